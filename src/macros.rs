// This is to facillitate the two different ways to call
// `impl_var`: one with doc comments and one without.
#[macro_export]
#[doc(hidden)]
macro_rules! impl_var_base {
    ($name:ident, $ty:ty, $( $var:ident => $val:expr ),* ) => {
        impl From<$ty> for $name {
            fn from(v: $ty) -> Self {
                match v {
                    $(
                        i if i == $val => $name::$var,
                    )*
                    i => $name::UnrecognizedVariant(i)
                }
            }
        }

        impl From<$name> for $ty {
            fn from(v: $name) -> Self {
                match v {
                    $(
                        $name::$var => $val,
                    )*
                    $name::UnrecognizedVariant(i) => i,
                }
            }
        }

        impl<'a> From<&'a $name> for $ty {
            fn from(v: &'a $name) -> Self {
                match *v {
                    $(
                        $name::$var => $val,
                    )*
                    $name::UnrecognizedVariant(i) => i,
                }
            }
        }

        impl $crate::Size for $name {
            fn size(&self) -> usize {
                std::mem::size_of::<$ty>()
            }
        }

        impl $crate::TypeSize for $name {
            fn type_size() -> usize {
                std::mem::size_of::<$ty>()
            }
        }

        impl $crate::ToBytes for $name {
            fn to_bytes(
                &self,
                buffer: &mut std::io::Cursor<Vec<u8>>,
            ) -> Result<(), $crate::err::SerError> {
                let v: $ty = self.into();
                v.to_bytes(buffer)
            }
        }

        impl $crate::FromBytes for $name {
            fn from_bytes(
                buffer: &mut std::io::Cursor<&[u8]>,
            ) -> Result<Self, $crate::err::DeError> {
                let v = <$ty as $crate::FromBytes>::from_bytes(buffer)?;
                Ok(v.into())
            }
        }
    };
}

#[macro_export]
/// For naming a new enum, passing in what type it serializes to and
/// deserializes from, and providing a mapping from variants to
/// expressions that will ultimately be used in the
/// serialization/deserialization step when writing the frame out as
/// bytes.
///
/// # Usage
/// Create an `enum` named "MyElementId" that can be serialized into
/// `u8`s to use in information elements:
/// ```ignore
/// impl_var!(
///     /// Element IDs understood by my parser.
///     MyElementId, u8,
///     Ssid => 0,
///     SupportedRates => 1
/// );
/// ```
macro_rules! impl_var {
    (
        $( #[$outer:meta] )*
        $name:ident, $ty:ty, $( $var:ident => $val:expr ),* $(,)?
    ) => (
        $(#[$outer])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        pub enum $name {
            $(
                #[allow(missing_docs)]
                $var,
            )*
            /// Variant that signifies an invalid value while deserializing
            UnrecognizedVariant($ty),
        }

        impl_var_base!($name, $ty, $( $var => $val),* );
    );
}

#[cfg(test)]
mod test {
    use crate::{deserialize, serialize};

    impl_var!(
        /// Test enum for round trip conversions.
        TestId, u8,
        Alpha => 0,
        Beta => 7
    );

    #[test]
    fn test_impl_var_round_trip() {
        assert_eq!(u8::from(TestId::Beta), 7);
        assert_eq!(TestId::from(0u8), TestId::Alpha);
        assert_eq!(TestId::from(200u8), TestId::UnrecognizedVariant(200));

        let bytes = serialize(&TestId::Beta).unwrap();
        assert_eq!(bytes, vec![7]);
        let de: TestId = deserialize(&bytes).unwrap();
        assert_eq!(de, TestId::Beta);
    }
}
