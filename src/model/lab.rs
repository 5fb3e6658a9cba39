use serde::{Deserialize, Serialize};

/// Where a lab can be reached. Host name is the lab's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabLocator {
    pub ip: String,
    pub host_name: String,
    pub ports: Vec<u16>,
}

impl LabLocator {
    pub fn new(ip: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            host_name: host_name.into(),
            ports: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabServerSetting {
    pub ports: Vec<u16>,
}

/// A single host property entry. Keys may repeat (multimap semantics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProperty {
    pub key: String,
    pub value: String,
}

impl HostProperty {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabServerFeature {
    pub host_properties: Vec<HostProperty>,
}

impl LabServerFeature {
    /// Values of all properties whose key matches, ignoring ASCII case.
    pub fn property_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.host_properties
            .iter()
            .filter(move |property| property.key.eq_ignore_ascii_case(key))
            .map(|property| property.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabStatus {
    Running,
    Missing,
}

/// Read-side snapshot of a lab, as served by fleet views and history records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabInfo {
    pub locator: LabLocator,
    pub server_setting: LabServerSetting,
    pub server_feature: LabServerFeature,
    pub status: LabStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_values_ignore_key_case() {
        let feature = LabServerFeature {
            host_properties: vec![
                HostProperty::new("Pool", "shared"),
                HostProperty::new("pool", "private"),
                HostProperty::new("label", "x"),
            ],
        };
        let values: Vec<&str> = feature.property_values("POOL").collect();
        assert_eq!(values, vec!["shared", "private"]);
    }
}
