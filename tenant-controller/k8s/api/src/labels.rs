use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Selects a set of objects by their labels.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Selector {
    match_labels: Map,
    match_expressions: Expressions,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidSelector {
    #[error("unknown label selector operator {0:?}")]
    Operator(String),

    #[error("operator {operator:?} on {key:?} requires values")]
    MissingValues { key: String, operator: Operator },
}

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: Map::new(),
            match_expressions: exprs,
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: map,
            match_expressions: Expressions::new(),
        }
    }

    pub fn with_equals(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.match_labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_exists(mut self, key: impl ToString) -> Self {
        self.match_expressions.push(Expression {
            key: key.to_string(),
            operator: Operator::Exists,
            values: BTreeSet::new(),
        });
        self
    }

    /// Excludes objects whose `key` label is one of `values`. An empty set of
    /// values excludes nothing and is omitted.
    pub fn with_not_in<I, S>(mut self, key: impl ToString, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let values = values
            .into_iter()
            .map(|v| v.to_string())
            .collect::<BTreeSet<_>>();
        if !values.is_empty() {
            self.match_expressions.push(Expression {
                key: key.to_string(),
                operator: Operator::NotIn,
                values,
            });
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        for expr in self.match_expressions.iter() {
            if !expr.matches(labels.as_ref()) {
                return false;
            }
        }

        for (k, v) in self.match_labels.iter() {
            if labels.0.get(k) != Some(v) {
                return false;
            }
        }

        true
    }
}

impl TryFrom<&LabelSelector> for Selector {
    type Error = InvalidSelector;

    fn try_from(selector: &LabelSelector) -> Result<Self, Self::Error> {
        let match_expressions = selector
            .match_expressions
            .iter()
            .flatten()
            .map(Expression::try_from)
            .collect::<Result<Expressions, _>>()?;
        Ok(Self {
            match_labels: selector.match_labels.clone().unwrap_or_default(),
            match_expressions,
        })
    }
}

/// Renders the selector in the API server's query syntax.
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for (k, v) in &self.match_labels {
            write!(f, "{}{}={}", sep, k, v)?;
            sep = ",";
        }
        for expr in &self.match_expressions {
            write!(f, "{}{}", sep, expr)?;
            sep = ",";
        }
        Ok(())
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

// === Labels ===

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === Expression ===

impl Expression {
    pub fn new<I, S>(key: impl ToString, operator: Operator, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            key: key.to_string(),
            operator,
            values: values.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map(|v| self.values.contains(v))
                .unwrap_or(false),
            Operator::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.contains(v))
                .unwrap_or(true),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

impl TryFrom<&LabelSelectorRequirement> for Expression {
    type Error = InvalidSelector;

    fn try_from(req: &LabelSelectorRequirement) -> Result<Self, Self::Error> {
        let operator = match req.operator.as_str() {
            "In" => Operator::In,
            "NotIn" => Operator::NotIn,
            "Exists" => Operator::Exists,
            "DoesNotExist" => Operator::DoesNotExist,
            op => return Err(InvalidSelector::Operator(op.to_string())),
        };
        let values = req.values.clone().unwrap_or_default();
        if matches!(operator, Operator::In | Operator::NotIn) && values.is_empty() {
            return Err(InvalidSelector::MissingValues {
                key: req.key.clone(),
                operator,
            });
        }
        Ok(Self::new(&req.key, operator, values))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = || self.values.iter().cloned().collect::<Vec<_>>().join(",");
        match self.operator {
            Operator::In => write!(f, "{} in ({})", self.key, values()),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, values()),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn test_matches() {
        for (selector, labels, matches, msg) in &[
            (Selector::default(), Labels::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "bar"))),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::In, ["bar"]))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "expression match",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::NotIn, ["bar"]))),
                Labels::from_iter(vec![("foo", "bar")]),
                false,
                "notin excludes listed value",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::NotIn, ["bar"]))),
                Labels::from_iter(vec![("foo", "baz")]),
                true,
                "notin admits other values",
            ),
            (
                Selector::default().with_exists("foo").with_not_in("foo", ["0"]),
                Labels::from_iter(vec![("bah", "baz")]),
                false,
                "exists requires the key",
            ),
            (
                Selector::default().with_exists("foo").with_not_in("foo", ["0"]),
                Labels::from_iter(vec![("foo", "1")]),
                true,
                "exists and notin",
            ),
            (
                Selector::from_iter(Some(Expression::new(
                    "foo",
                    Operator::DoesNotExist,
                    None::<String>,
                ))),
                Labels::from_iter(vec![("foo", "1")]),
                false,
                "does not exist",
            ),
        ] {
            assert_eq!(selector.matches(labels), *matches, "{}", msg);
        }
    }

    #[test]
    fn renders_query_syntax() {
        let selector = Selector::default()
            .with_equals("capsule.clastix.io/tenant", "t1")
            .with_exists("capsule.clastix.io/limit-range")
            .with_not_in("capsule.clastix.io/limit-range", ["1", "0"]);
        assert_eq!(
            selector.to_string(),
            "capsule.clastix.io/tenant=t1,capsule.clastix.io/limit-range,capsule.clastix.io/limit-range notin (0,1)"
        );

        let empty_keep = Selector::default()
            .with_exists("capsule.clastix.io/network-policy")
            .with_not_in("capsule.clastix.io/network-policy", Vec::<String>::new());
        assert_eq!(empty_keep.to_string(), "capsule.clastix.io/network-policy");
    }

    #[test]
    fn converts_label_selectors() {
        let selector = LabelSelector {
            match_labels: Some(maplit::btreemap! { "env".into() => "prod".into() }),
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".into(),
                operator: "In".into(),
                values: Some(vec!["gold".into()]),
            }]),
        };
        let selector = Selector::try_from(&selector).expect("selector must convert");
        assert!(selector.matches(&Labels::from_iter(vec![("env", "prod"), ("tier", "gold")])));
        assert!(!selector.matches(&Labels::from_iter(vec![("env", "prod")])));

        let invalid = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".into(),
                operator: "Near".into(),
                values: None,
            }]),
            ..Default::default()
        };
        assert!(matches!(
            Selector::try_from(&invalid),
            Err(InvalidSelector::Operator(_))
        ));
    }
}
