// Rule grammar: `<resource> <op> <amount>` or `<amount> <op> <resource>`

use crate::error::{OverseerError, Result};
use crate::resource::{Amount, Resource};
use std::cmp::Ordering;

const OPERATOR_CHARS: &[char] = &['<', '>', '='];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "==" => Some(Operator::Eq),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Le),
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Ge),
            _ => None,
        }
    }

    /// Operator with its operands swapped: `a < b` is `b > a`
    pub fn mirrored(self) -> Self {
        match self {
            Operator::Eq => Operator::Eq,
            Operator::Lt => Operator::Gt,
            Operator::Le => Operator::Ge,
            Operator::Gt => Operator::Lt,
            Operator::Ge => Operator::Le,
        }
    }

    pub fn holds(self, left: Amount, right: Amount) -> bool {
        let Some(ordering) = left.compare(right) else {
            return false;
        };
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A rule normalised so the resource is always on the left
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Condition {
    pub resource: Resource,
    pub operator: Operator,
    pub threshold: Amount,
}

impl Condition {
    pub fn holds(&self, reading: Amount) -> bool {
        self.operator.holds(reading, self.threshold)
    }
}

pub fn parse_rule(rule: &str) -> Result<Condition> {
    let fail = |reason: String| OverseerError::RuleParse {
        rule: rule.to_string(),
        reason,
    };

    let compact: String = rule.chars().filter(|c| !c.is_whitespace()).collect();

    let start = compact
        .find(OPERATOR_CHARS)
        .ok_or_else(|| fail("missing comparison operator".to_string()))?;
    let end = compact[start..]
        .find(|c: char| !OPERATOR_CHARS.contains(&c))
        .map(|offset| start + offset)
        .unwrap_or(compact.len());

    let symbol = &compact[start..end];
    let operator =
        Operator::from_symbol(symbol).ok_or_else(|| fail(format!("invalid operator '{}'", symbol)))?;

    let left = &compact[..start];
    let right = &compact[end..];
    if left.is_empty() || right.is_empty() {
        return Err(fail("expected an operand on both sides".to_string()));
    }

    let (resource, literal, operator) = match (Resource::from_name(left), Resource::from_name(right)) {
        (Ok(resource), _) => (resource, right, operator),
        (Err(_), Ok(resource)) => (resource, left, operator.mirrored()),
        (Err(_), Err(_)) => {
            return Err(fail(format!(
                "no known resource in '{}' or '{}'",
                left, right
            )))
        }
    };

    let threshold = resource.parse_amount(literal).map_err(fail)?;

    Ok(Condition {
        resource,
        operator,
        threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_resource_on_either_side() {
        let left = parse_rule("memory_used==2gb").unwrap();
        let right = parse_rule("2gb==memory_used").unwrap();
        assert_eq!(left, right);
        assert_eq!(left.resource, Resource::MemoryUsed);
        assert_eq!(left.threshold, Amount::Integer(2 * GB));
    }

    #[test]
    fn test_whitespace_insensitive() {
        assert_eq!(
            parse_rule("  memory_used  >=  512 mb ").unwrap(),
            parse_rule("memory_used>=512mb").unwrap()
        );
    }

    #[test]
    fn test_operator_is_mirrored() {
        let rule = parse_rule("2gb < memory_used").unwrap();
        assert_eq!(rule.operator, Operator::Gt);
        assert_eq!(rule, parse_rule("memory_used > 2gb").unwrap());

        let rule = parse_rule("50 >= cpu_percent").unwrap();
        assert_eq!(rule.operator, Operator::Le);
        assert_eq!(rule.threshold, Amount::Float(50.0));
    }

    #[test]
    fn test_all_operators() {
        for (text, op) in [
            ("cpu_percent == 1", Operator::Eq),
            ("cpu_percent < 1", Operator::Lt),
            ("cpu_percent <= 1", Operator::Le),
            ("cpu_percent > 1", Operator::Gt),
            ("cpu_percent >= 1", Operator::Ge),
        ] {
            assert_eq!(parse_rule(text).unwrap().operator, op, "{}", text);
        }
    }

    #[test]
    fn test_unknown_resource() {
        let err = parse_rule("disk_used > 2gb").unwrap_err();
        match &err {
            OverseerError::RuleParse { rule, .. } => assert_eq!(rule, "disk_used > 2gb"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("disk_used > 2gb"));
    }

    #[test]
    fn test_malformed_rules() {
        for text in [
            "memory_used 2gb",
            "memory_used => 2gb",
            "memory_used >",
            "> 2gb",
            "memory_used > 2",
            "cpu_percent > lots",
            "",
        ] {
            assert!(
                matches!(parse_rule(text), Err(OverseerError::RuleParse { .. })),
                "{:?} should not parse",
                text
            );
        }
    }

    #[test]
    fn test_condition_holds() {
        let rule = parse_rule("memory_used > 1gb").unwrap();
        assert!(rule.holds(Amount::Integer(GB + 1)));
        assert!(!rule.holds(Amount::Integer(GB)));

        let rule = parse_rule("cpu_percent <= 80").unwrap();
        assert!(rule.holds(Amount::Float(80.0)));
        assert!(!rule.holds(Amount::Float(80.5)));
    }
}
