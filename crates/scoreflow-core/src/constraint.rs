//! Constraint identity and impact direction.
//!
//! Every terminal scoring node in the network is tied to exactly one
//! [`ConstraintRef`]; score explanation reports matches per reference.

/// Reference to a constraint for identification.
///
/// # Example
///
/// ```
/// use scoreflow_core::ConstraintRef;
///
/// let cr = ConstraintRef::new("shift-rostering", "No overlapping shifts");
/// assert_eq!(cr.full_name(), "shift-rostering/No overlapping shifts");
///
/// let bare = ConstraintRef::new("", "Minimize cost");
/// assert_eq!(bare.full_name(), "Minimize cost");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstraintRef {
    /// Package/module grouping the constraint, may be empty.
    pub package: String,
    /// Name of the constraint, unique within its package.
    pub name: String,
}

impl ConstraintRef {
    /// Creates a new constraint reference.
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }

    /// Returns the fully qualified name.
    pub fn full_name(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.package, self.name)
        }
    }
}

impl std::fmt::Display for ConstraintRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// Direction in which a constraint match moves the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImpactType {
    /// Penalize (subtract the weight from the score).
    Penalty,
    /// Reward (add the weight to the score).
    Reward,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_with_package() {
        let cr = ConstraintRef::new("rostering", "Skill mismatch");
        assert_eq!(cr.full_name(), "rostering/Skill mismatch");
        assert_eq!(cr.to_string(), "rostering/Skill mismatch");
    }

    #[test]
    fn test_full_name_empty_package() {
        let cr = ConstraintRef::new("", "Skill mismatch");
        assert_eq!(cr.full_name(), "Skill mismatch");
    }

    #[test]
    fn test_impact_type_distinct() {
        assert_ne!(ImpactType::Penalty, ImpactType::Reward);
    }
}
