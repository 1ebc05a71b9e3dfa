use crate::Quantity;

/// The outcome of comparing a tenant's aggregate usage against its declared
/// hard limit for one resource.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Budget {
    /// Usage is strictly below the limit; namespaces get the declared limit back.
    UnderBudget,

    /// Usage has reached or exceeded the limit; each namespace is frozen at its
    /// own current usage.
    AtOrOverBudget,
}

// === impl Budget ===

impl Budget {
    pub fn evaluate(used: Quantity, hard: Quantity) -> Self {
        if used < hard {
            Self::UnderBudget
        } else {
            Self::AtOrOverBudget
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_usage_is_at_budget() {
        let four = Quantity::from_units(4);
        assert_eq!(Budget::evaluate(four, four), Budget::AtOrOverBudget);
        assert_eq!(
            Budget::evaluate(Quantity::from_units(5), four),
            Budget::AtOrOverBudget
        );
        assert_eq!(
            Budget::evaluate(Quantity::from_units(3), four),
            Budget::UnderBudget
        );
    }
}
