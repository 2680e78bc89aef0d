/// Macro to implement `From<Decimal>` conversions for newtype wrappers
/// around fixed-precision decimals.
#[macro_export]
macro_rules! impl_from_decimal {
    ($wrapper:ident) => {
        impl From<rust_decimal::Decimal> for $wrapper {
            fn from(value: rust_decimal::Decimal) -> Self {
                Self(value)
            }
        }

        impl From<$wrapper> for rust_decimal::Decimal {
            fn from(wrapper: $wrapper) -> Self {
                wrapper.0
            }
        }

        impl std::fmt::Display for $wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

/// Macro to implement `Add`, `Sub`, the assign variants, and `Sum` for
/// newtype wrappers around fixed-precision decimals.
#[macro_export]
macro_rules! impl_add_sub_decimal {
    ($wrapper:ident) => {
        impl std::ops::Add for $wrapper {
            type Output = Self;

            fn add(self, other: Self) -> Self {
                Self(self.0 + other.0)
            }
        }

        impl std::ops::AddAssign for $wrapper {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl std::ops::Sub for $wrapper {
            type Output = Self;

            fn sub(self, other: Self) -> Self {
                Self(self.0 - other.0)
            }
        }

        impl std::ops::SubAssign for $wrapper {
            fn sub_assign(&mut self, rhs: Self) {
                self.0 -= rhs.0;
            }
        }

        impl std::iter::Sum for $wrapper {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold(Self(rust_decimal::Decimal::ZERO), |acc, x| {
                    Self(acc.0 + x.0)
                })
            }
        }
    };
}
