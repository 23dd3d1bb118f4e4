//! Exit-code flags. Each processed input contributes a flag; the process
//! exits with the bitwise OR of them all.

use std::ops::{BitOr, BitOrAssign};

macro_rules! exit_flags {
    ($name:ident { $($flag:ident = $bit:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(u8);

        impl $name {
            pub const OK: Self = Self(0);
            $(pub const $flag: Self = Self($bit);)+

            pub fn bits(self) -> u8 {
                self.0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

exit_flags!(ClearExit { ERROR = 1 });

exit_flags!(GenerateExit {
    READ_ERROR = 1,
    VALIDATE_ERROR = 2,
    WRITE_ERROR = 4,
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_compose_with_or() {
        let mut exit = GenerateExit::OK;
        exit |= GenerateExit::READ_ERROR;
        exit |= GenerateExit::WRITE_ERROR;
        assert_eq!(exit.bits(), 5);
        assert_eq!((ClearExit::OK | ClearExit::ERROR).bits(), 1);
    }
}
