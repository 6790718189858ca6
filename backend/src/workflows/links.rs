// Record links - which field on a follow-up or related record points back at a parent

use std::collections::HashMap;

/// Maps a record type to the name of the link field used by tasks,
/// activities and related records that belong to it.
#[derive(Debug, Clone)]
pub struct RecordLinkRegistry {
    links: HashMap<String, String>,
}

impl Default for RecordLinkRegistry {
    fn default() -> Self {
        Self::empty()
            .register("Lead", "lead_id")
            .register("Contact", "contact_id")
            .register("Account", "account_id")
            .register("Opportunity", "opportunity_id")
            .register("Ticket", "ticket_id")
            .register("Project", "project_id")
            .register("Invoice", "invoice_id")
    }
}

impl RecordLinkRegistry {
    pub fn empty() -> Self {
        Self { links: HashMap::new() }
    }

    pub fn register(mut self, record_type: &str, link_field: &str) -> Self {
        self.links
            .insert(record_type.to_ascii_lowercase(), link_field.to_string());
        self
    }

    pub fn link_field(&self, record_type: &str) -> Option<&str> {
        self.links
            .get(&record_type.to_ascii_lowercase())
            .map(String::as_str)
    }
}
