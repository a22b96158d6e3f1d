//! Action report: the structured result of every command.
//!
//! Identical items (same class, property, message and status) are
//! aggregated into one entry whose `numberOfObjects` counts occurrences.

use serde::{Deserialize, Serialize};

use crate::types::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportItem {
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    pub message: String,
    pub status: ReportStatus,
    pub number_of_objects: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReport {
    pub items: Vec<ReportItem>,
    /// Objects created or rewritten by the command.
    pub affected_objects: usize,
    /// Objects marked with the has-invalid-data flag.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flagged_objects: Vec<ObjectId>,
}

impl ActionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, class_name: &str, property: Option<&str>, message: &str, status: ReportStatus) {
        self.push_many(class_name, property, message, status, 1);
    }

    pub fn push_many(
        &mut self,
        class_name: &str,
        property: Option<&str>,
        message: &str,
        status: ReportStatus,
        count: usize,
    ) {
        if let Some(item) = self.items.iter_mut().find(|i| {
            i.status == status
                && i.class_name == class_name
                && i.property.as_deref() == property
                && i.message == message
        }) {
            item.number_of_objects += count;
            return;
        }
        self.items.push(ReportItem {
            class_name: class_name.to_string(),
            property: property.map(str::to_string),
            message: message.to_string(),
            status,
            number_of_objects: count,
        });
    }

    pub fn warning(&mut self, class_name: &str, property: Option<&str>, message: &str) {
        self.push(class_name, property, message, ReportStatus::Warning);
    }

    pub fn error(&mut self, class_name: &str, property: Option<&str>, message: &str) {
        self.push(class_name, property, message, ReportStatus::Error);
    }

    pub fn flag(&mut self, object: ObjectId) {
        if !self.flagged_objects.contains(&object) {
            self.flagged_objects.push(object);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| i.status == ReportStatus::Error)
    }

    pub fn is_clean(&self) -> bool {
        self.items.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: ActionReport) {
        for item in other.items {
            self.push_many(
                &item.class_name,
                item.property.as_deref(),
                &item.message,
                item.status,
                item.number_of_objects,
            );
        }
        self.affected_objects += other.affected_objects;
        for id in other.flagged_objects {
            self.flag(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_items_aggregate() {
        let mut report = ActionReport::new();
        report.warning("Person", Some("age"), "value is required");
        report.warning("Person", Some("age"), "value is required");
        report.error("Person", Some("age"), "value is required");
        report.warning("Person", None, "value is required");
        assert_eq!(report.items.len(), 3);
        assert_eq!(report.items[0].number_of_objects, 2);
        assert!(report.has_errors());
    }

    #[test]
    fn test_json_shape() {
        let mut report = ActionReport::new();
        report.error("Order", Some("customer"), "dangling reference");
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(
            v["items"][0],
            serde_json::json!({
                "className": "Order",
                "property": "customer",
                "message": "dangling reference",
                "status": "error",
                "numberOfObjects": 1
            })
        );
        assert!(v.get("flaggedObjects").is_none());
    }

    #[test]
    fn test_merge() {
        let mut a = ActionReport::new();
        a.warning("A", None, "m");
        a.affected_objects = 2;
        let mut b = ActionReport::new();
        b.warning("A", None, "m");
        b.flag(ObjectId(7));
        b.affected_objects = 1;
        a.merge(b);
        assert_eq!(a.items[0].number_of_objects, 2);
        assert_eq!(a.affected_objects, 3);
        assert_eq!(a.flagged_objects, vec![ObjectId(7)]);
    }
}
