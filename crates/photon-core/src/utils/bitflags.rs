// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Declarative macro for small flag sets (feature masks, build flags,
//! ray visibility).

/// Declares a `Copy` flag-set newtype with set operations and a readable `Debug`.
///
/// Unknown bits are preserved by `from_bits_retain` and dropped by
/// `from_bits_truncate`.
#[macro_export]
macro_rules! photon_bitflags {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident: $ty:ty {
            $(
                $(#[$flag_attr:meta])*
                const $flag_name:ident = $flag_value:expr;
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name {
            bits: $ty,
        }

        impl $name {
            $(
                $(#[$flag_attr])*
                pub const $flag_name: Self = Self { bits: $flag_value };
            )*

            /// The empty set.
            pub const EMPTY: Self = Self { bits: 0 };

            /// Every declared flag.
            pub const fn all() -> Self {
                Self { bits: 0 $(| $flag_value)* }
            }

            /// Keeps only the bits that correspond to declared flags.
            pub const fn from_bits_truncate(bits: $ty) -> Self {
                Self { bits: bits & Self::all().bits }
            }

            /// Keeps every bit, declared or not.
            pub const fn from_bits_retain(bits: $ty) -> Self {
                Self { bits }
            }

            /// Raw bit value.
            pub const fn bits(&self) -> $ty {
                self.bits
            }

            /// `true` when no bit is set.
            pub const fn is_empty(&self) -> bool {
                self.bits == 0
            }

            /// `true` if every bit of `other` is set in `self`.
            pub const fn contains(&self, other: Self) -> bool {
                (self.bits & other.bits) == other.bits
            }

            /// `true` if any bit of `other` is set in `self`.
            pub const fn intersects(&self, other: Self) -> bool {
                (self.bits & other.bits) != 0
            }

            /// Sets the bits of `other`.
            pub fn insert(&mut self, other: Self) {
                self.bits |= other.bits;
            }

            /// Clears the bits of `other`.
            pub fn remove(&mut self, other: Self) {
                self.bits &= !other.bits;
            }

            /// Sets or clears `other` depending on `value`.
            pub fn set(&mut self, other: Self, value: bool) {
                if value {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }

            /// Returns `self` with `other` set.
            #[must_use]
            pub const fn with(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }

            /// Returns `self` with `other` cleared.
            #[must_use]
            pub const fn without(self, other: Self) -> Self {
                Self { bits: self.bits & !other.bits }
            }

            /// Names of the declared flags present in `self`.
            pub fn names(&self) -> Vec<&'static str> {
                let mut names = Vec::new();
                $(
                    if ($flag_value != 0) && (self.bits & $flag_value) == $flag_value {
                        names.push(stringify!($flag_name));
                    }
                )*
                names
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }
        }

        impl core::ops::BitAnd for $name {
            type Output = Self;
            fn bitand(self, other: Self) -> Self {
                Self { bits: self.bits & other.bits }
            }
        }

        impl core::ops::Not for $name {
            type Output = Self;
            fn not(self) -> Self {
                Self::from_bits_truncate(!self.bits)
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, other: Self) {
                self.bits |= other.bits;
            }
        }

        impl core::ops::BitAndAssign for $name {
            fn bitand_assign(&mut self, other: Self) {
                self.bits &= other.bits;
            }
        }

        impl $crate::__serde::Serialize for $name {
            fn serialize<S: $crate::__serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                $crate::__serde::Serialize::serialize(&self.bits, serializer)
            }
        }

        impl<'de> $crate::__serde::Deserialize<'de> for $name {
            fn deserialize<D: $crate::__serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                <$ty as $crate::__serde::Deserialize>::deserialize(deserializer).map(Self::from_bits_retain)
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                let names = self.names();
                if names.is_empty() {
                    return write!(f, "{}(EMPTY)", stringify!($name));
                }
                write!(f, "{}({})", stringify!($name), names.join(" | "))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    photon_bitflags! {
        struct Sample: u8 {
            const A = 1 << 0;
            const B = 1 << 1;
            const C = 1 << 4;
        }
    }

    #[test]
    fn truncate_drops_undeclared_bits() {
        let flags = Sample::from_bits_truncate(0xFF);
        assert_eq!(flags, Sample::all());
        assert_eq!(flags.bits(), 0b1_0011);
        assert_eq!(Sample::from_bits_retain(0xFF).bits(), 0xFF);
    }

    #[test]
    fn set_operations() {
        let mut flags = Sample::A | Sample::C;
        assert!(flags.contains(Sample::A));
        assert!(!flags.contains(Sample::A | Sample::B));
        assert!(flags.intersects(Sample::B | Sample::C));
        flags.set(Sample::B, true);
        flags.remove(Sample::A);
        assert_eq!(flags, Sample::B | Sample::C);
        assert_eq!(!flags, Sample::A);
        assert!(Sample::EMPTY.is_empty());
    }

    #[test]
    fn debug_lists_flag_names() {
        assert_eq!(format!("{:?}", Sample::A | Sample::C), "Sample(A | C)");
        assert_eq!(format!("{:?}", Sample::EMPTY), "Sample(EMPTY)");
    }
}
