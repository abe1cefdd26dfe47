/// Lock modes of the multigranularity hierarchy. The intent modes (IS, IX,
/// SIX) announce finer-grain locking below a node and never grant data access
/// at the node itself, except that SIX also grants S there. NL is the absence
/// of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    NL,
    IS,
    IX,
    S,
    SIX,
    X,
}

impl LockType {
    /// Whether two transactions may hold `a` and `b` on the same resource at
    /// the same time. Commutative.
    pub fn compatible(a: LockType, b: LockType) -> bool {
        use LockType::*;
        match (a, b) {
            (NL, _) | (_, NL) => true,
            (IS, X) | (X, IS) => false,
            (IS, _) | (_, IS) => true,
            (IX, IX) => true,
            (S, S) => true,
            _ => false,
        }
    }

    /// Whether `substitute` can stand in for `required`, i.e. grants at least
    /// the privileges that `required` does.
    pub fn substitutable(substitute: LockType, required: LockType) -> bool {
        use LockType::*;
        match required {
            NL => true,
            IS => matches!(substitute, IS | IX | S | SIX | X),
            IX => matches!(substitute, IX | SIX | X),
            S => matches!(substitute, S | SIX | X),
            SIX => matches!(substitute, SIX | X),
            X => substitute == X,
        }
    }

    /// Whether a lock of mode `parent` on a node permits a lock of mode
    /// `child` one level below it.
    pub fn can_be_parent_lock(parent: LockType, child: LockType) -> bool {
        use LockType::*;
        match child {
            NL => true,
            IS => matches!(parent, IS | IX),
            S => matches!(parent, IS | IX | S | SIX | X),
            IX | SIX | X => matches!(parent, IX | SIX | X),
        }
    }

    pub fn is_intent(self) -> bool {
        matches!(self, LockType::IS | LockType::IX | LockType::SIX)
    }
}

impl std::fmt::Display for LockType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            LockType::NL => "NL",
            LockType::IS => "IS",
            LockType::IX => "IX",
            LockType::S => "S",
            LockType::SIX => "SIX",
            LockType::X => "X",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::LockType::{self, *};

    const ALL: [LockType; 6] = [NL, IS, IX, S, SIX, X];

    #[test]
    fn compatibility_matrix() {
        let expected = [
            // NL, IS, IX, S, SIX, X
            [true, true, true, true, true, true],    // NL
            [true, true, true, true, true, false],   // IS
            [true, true, true, false, false, false], // IX
            [true, true, false, true, false, false], // S
            [true, true, false, false, false, false], // SIX
            [true, false, false, false, false, false], // X
        ];
        for (i, a) in ALL.iter().enumerate() {
            for (j, b) in ALL.iter().enumerate() {
                assert_eq!(
                    LockType::compatible(*a, *b),
                    expected[i][j],
                    "compatible({}, {})",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn compatibility_is_commutative() {
        for a in ALL {
            for b in ALL {
                assert_eq!(LockType::compatible(a, b), LockType::compatible(b, a));
            }
        }
    }

    #[test]
    fn substitutability() {
        for required in ALL {
            assert!(LockType::substitutable(X, required));
            assert!(LockType::substitutable(required, required));
            assert!(LockType::substitutable(required, NL));
        }
        assert!(LockType::substitutable(SIX, S));
        assert!(LockType::substitutable(SIX, IS));
        assert!(LockType::substitutable(SIX, IX));
        assert!(LockType::substitutable(S, IS));
        assert!(LockType::substitutable(IX, IS));

        assert!(!LockType::substitutable(S, X));
        assert!(!LockType::substitutable(S, IX));
        assert!(!LockType::substitutable(IX, S));
        assert!(!LockType::substitutable(IS, S));
        assert!(!LockType::substitutable(SIX, X));
    }

    #[test]
    fn parent_requirements() {
        for parent in ALL {
            assert!(LockType::can_be_parent_lock(parent, NL));
        }
        assert!(LockType::can_be_parent_lock(IS, IS));
        assert!(LockType::can_be_parent_lock(IX, IS));
        assert!(!LockType::can_be_parent_lock(S, IS));
        assert!(!LockType::can_be_parent_lock(NL, IS));

        assert!(LockType::can_be_parent_lock(IX, X));
        assert!(LockType::can_be_parent_lock(SIX, X));
        assert!(LockType::can_be_parent_lock(X, X));
        assert!(!LockType::can_be_parent_lock(IS, X));
        assert!(!LockType::can_be_parent_lock(S, IX));

        assert!(LockType::can_be_parent_lock(IS, S));
        assert!(LockType::can_be_parent_lock(X, S));
        assert!(!LockType::can_be_parent_lock(NL, S));
    }
}
