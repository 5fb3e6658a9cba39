//! Fleet view filtering: match conditions over lab and device fields.
//!
//! A filter is the AND of its conditions. String matching is case-insensitive
//! for `Include` and case-sensitive (full-string) for `MatchesRegex`. A
//! condition that fails to compile (bad regex) matches nothing rather than
//! failing the query.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{DeviceFeature, DeviceStatus, LabServerFeature};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringMatchCondition {
    /// Matches if the field equals any expected value, ignoring ASCII case.
    Include(Vec<String>),
    /// Matches if the regex matches the whole field value.
    MatchesRegex(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntegerMatch {
    Equal(usize),
    GreaterThanOrEqual(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringListMatchCondition {
    /// Matches if any element matches the inner condition.
    AnyMatch(StringMatchCondition),
    /// Matches if no element matches the inner condition.
    NoneMatch(StringMatchCondition),
    /// Matches if every expected value appears in the list (case-insensitive).
    SubsetMatch(Vec<String>),
    /// Matches on the number of elements.
    LengthMatch(IntegerMatch),
}

/// Matches one key of a string multimap against a list condition over all
/// values under that key. An empty key matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StringMultimapMatchCondition {
    pub key: String,
    pub value_condition: StringListMatchCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabMatchCondition {
    HostName(StringMatchCondition),
    Property(StringMultimapMatchCondition),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceMatchCondition {
    Uuid(StringMatchCondition),
    Status(StringMatchCondition),
    DeviceType(StringListMatchCondition),
    Owner(StringListMatchCondition),
    Driver(StringListMatchCondition),
    Decorator(StringListMatchCondition),
    Dimension(StringMultimapMatchCondition),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabFilter {
    pub conditions: Vec<LabMatchCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceFilter {
    pub conditions: Vec<DeviceMatchCondition>,
}

/// Filters labs and devices independently; devices are attached to labs that
/// themselves passed the lab filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FleetFilter {
    pub lab_filter: LabFilter,
    pub device_filter: DeviceFilter,
}

enum StringMatcher {
    Include(HashSet<String>),
    Regex(Regex),
    /// Compilation failed; matches nothing.
    Never,
}

impl StringMatcher {
    fn compile(condition: &StringMatchCondition) -> Self {
        match condition {
            StringMatchCondition::Include(expected) => StringMatcher::Include(
                expected.iter().map(|value| value.to_lowercase()).collect(),
            ),
            StringMatchCondition::MatchesRegex(pattern) => {
                // Full-string match semantics.
                match Regex::new(&format!("\\A(?:{pattern})\\z")) {
                    Ok(regex) => StringMatcher::Regex(regex),
                    Err(error) => {
                        tracing::warn!(pattern, %error, "Invalid filter regex, matching nothing");
                        StringMatcher::Never
                    }
                }
            }
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            StringMatcher::Include(expected) => expected.contains(&value.to_lowercase()),
            StringMatcher::Regex(regex) => regex.is_match(value),
            StringMatcher::Never => false,
        }
    }
}

enum ListMatcher {
    Any(StringMatcher),
    NoneOf(StringMatcher),
    Subset(HashSet<String>),
    Length(IntegerMatch),
}

impl ListMatcher {
    fn compile(condition: &StringListMatchCondition) -> Self {
        match condition {
            StringListMatchCondition::AnyMatch(inner) => {
                ListMatcher::Any(StringMatcher::compile(inner))
            }
            StringListMatchCondition::NoneMatch(inner) => {
                ListMatcher::NoneOf(StringMatcher::compile(inner))
            }
            StringListMatchCondition::SubsetMatch(expected) => ListMatcher::Subset(
                expected.iter().map(|value| value.to_lowercase()).collect(),
            ),
            StringListMatchCondition::LengthMatch(length) => ListMatcher::Length(length.clone()),
        }
    }

    fn matches<'a>(&self, values: impl Iterator<Item = &'a str>) -> bool {
        match self {
            ListMatcher::Any(matcher) => values.into_iter().any(|value| matcher.matches(value)),
            ListMatcher::NoneOf(matcher) => !values.into_iter().any(|value| matcher.matches(value)),
            ListMatcher::Subset(expected) => {
                let actual: HashSet<String> =
                    values.map(|value| value.to_lowercase()).collect();
                expected.iter().all(|value| actual.contains(value))
            }
            ListMatcher::Length(length) => {
                // Length counts distinct raw values; case folding applies to matching only.
                let count = values.collect::<HashSet<_>>().len();
                match length {
                    IntegerMatch::Equal(expected) => count == *expected,
                    IntegerMatch::GreaterThanOrEqual(min) => count >= *min,
                }
            }
        }
    }
}

struct MultimapMatcher {
    key: String,
    value_matcher: ListMatcher,
}

impl MultimapMatcher {
    fn compile(condition: &StringMultimapMatchCondition) -> Self {
        Self {
            key: condition.key.clone(),
            value_matcher: ListMatcher::compile(&condition.value_condition),
        }
    }

    fn matches<'a>(&self, entries: impl Iterator<Item = (&'a str, &'a str)>) -> bool {
        if self.key.is_empty() {
            return false;
        }
        let values: Vec<&str> = entries
            .filter(|(key, _)| key.eq_ignore_ascii_case(&self.key))
            .map(|(_, value)| value)
            .collect();
        self.value_matcher.matches(values.into_iter())
    }
}

enum LabMatcher {
    HostName(StringMatcher),
    Property(MultimapMatcher),
}

/// Compiled lab filter; AND of all conditions.
pub struct LabPredicate {
    matchers: Vec<LabMatcher>,
}

impl LabPredicate {
    pub fn compile(filter: &LabFilter) -> Self {
        Self {
            matchers: filter
                .conditions
                .iter()
                .map(|condition| match condition {
                    LabMatchCondition::HostName(inner) => {
                        LabMatcher::HostName(StringMatcher::compile(inner))
                    }
                    LabMatchCondition::Property(inner) => {
                        LabMatcher::Property(MultimapMatcher::compile(inner))
                    }
                })
                .collect(),
        }
    }

    pub fn matches(&self, host_name: &str, server_feature: &LabServerFeature) -> bool {
        self.matchers.iter().all(|matcher| match matcher {
            LabMatcher::HostName(inner) => inner.matches(host_name),
            LabMatcher::Property(inner) => inner.matches(
                server_feature
                    .host_properties
                    .iter()
                    .map(|property| (property.key.as_str(), property.value.as_str())),
            ),
        })
    }
}

enum DeviceMatcher {
    Uuid(StringMatcher),
    Status(StringMatcher),
    DeviceType(ListMatcher),
    Owner(ListMatcher),
    Driver(ListMatcher),
    Decorator(ListMatcher),
    Dimension(MultimapMatcher),
}

/// Compiled device filter; AND of all conditions.
pub struct DevicePredicate {
    matchers: Vec<DeviceMatcher>,
}

impl DevicePredicate {
    pub fn compile(filter: &DeviceFilter) -> Self {
        Self {
            matchers: filter
                .conditions
                .iter()
                .map(|condition| match condition {
                    DeviceMatchCondition::Uuid(inner) => {
                        DeviceMatcher::Uuid(StringMatcher::compile(inner))
                    }
                    DeviceMatchCondition::Status(inner) => {
                        DeviceMatcher::Status(StringMatcher::compile(inner))
                    }
                    DeviceMatchCondition::DeviceType(inner) => {
                        DeviceMatcher::DeviceType(ListMatcher::compile(inner))
                    }
                    DeviceMatchCondition::Owner(inner) => {
                        DeviceMatcher::Owner(ListMatcher::compile(inner))
                    }
                    DeviceMatchCondition::Driver(inner) => {
                        DeviceMatcher::Driver(ListMatcher::compile(inner))
                    }
                    DeviceMatchCondition::Decorator(inner) => {
                        DeviceMatcher::Decorator(ListMatcher::compile(inner))
                    }
                    DeviceMatchCondition::Dimension(inner) => {
                        DeviceMatcher::Dimension(MultimapMatcher::compile(inner))
                    }
                })
                .collect(),
        }
    }

    pub fn matches(&self, uuid: &str, status: DeviceStatus, feature: &DeviceFeature) -> bool {
        self.matchers.iter().all(|matcher| match matcher {
            DeviceMatcher::Uuid(inner) => inner.matches(uuid),
            DeviceMatcher::Status(inner) => inner.matches(status.as_str()),
            DeviceMatcher::DeviceType(inner) => {
                inner.matches(feature.types.iter().map(String::as_str))
            }
            DeviceMatcher::Owner(inner) => {
                inner.matches(feature.owners.iter().map(String::as_str))
            }
            DeviceMatcher::Driver(inner) => {
                inner.matches(feature.drivers.iter().map(String::as_str))
            }
            DeviceMatcher::Decorator(inner) => {
                inner.matches(feature.decorators.iter().map(String::as_str))
            }
            DeviceMatcher::Dimension(inner) => inner.matches(
                feature
                    .all_dimensions()
                    .map(|dimension| (dimension.name.as_str(), dimension.value.as_str())),
            ),
        })
    }
}
