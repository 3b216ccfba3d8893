/// Generates a non-exhaustive enum mapping Rust variants to wire header names.
///
/// Produces: enum definition + `as_str()` + `matches()` + `Display` + `AsRef<str>`
/// + `FromStr`. Lookups against frames are case-sensitive (`matches`), parsing
/// user input is case-insensitive (`FromStr`).
///
/// ```ignore
/// define_header_enum! {
///     error_type: ParseMyHeaderError,
///     /// Doc comment for the enum.
///     pub enum MyHeader {
///         Foo => "Foo-Header",
///         Bar => "Bar-Header",
///     }
/// }
/// ```
macro_rules! define_header_enum {
    (
        error_type: $Err:ident,
        $(#[$enum_meta:meta])*
        $vis:vis enum $Name:ident {
            $(
                $(#[$var_meta:meta])*
                $variant:ident => $wire:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        #[allow(missing_docs)]
        $vis enum $Name {
            $(
                $(#[$var_meta])*
                $variant,
            )+
        }

        impl $Name {
            /// Wire-format header name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $Name::$variant => $wire, )+
                }
            }

            /// Exact, case-sensitive comparison against a header name read off the wire.
            pub fn matches(&self, name: &str) -> bool {
                self.as_str() == name
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl std::str::FromStr for $Name {
            type Err = $Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($wire) {
                        return Ok($Name::$variant);
                    }
                )+
                Err($Err(s.to_string()))
            }
        }
    };
}
