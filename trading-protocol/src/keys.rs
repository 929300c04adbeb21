/// Queue and response-key naming for one tenant namespace.
///
/// A single request queue is shared by all front-end callers of a tenant;
/// each request gets its own response key derived from the correlation id.
#[derive(Debug, Clone)]
pub struct QueueNames {
    prefix: String,
}

pub const REQUEST_QUEUE: &str = "trading:requests";
pub const RESPONSE_PREFIX: &str = "trading:response:";

/// Seconds a response key lives before an abandoned (timed-out) response
/// is dropped by the queue store.
pub const RESPONSE_TTL_SECS: u64 = 60;

impl QueueNames {
    /// Namespace for a specific tenant (`tenant:<id>:` prefix).
    pub fn for_tenant(tenant_id: &str) -> Self {
        Self {
            prefix: format!("tenant:{}:", tenant_id),
        }
    }

    /// Unprefixed namespace, for single-tenant deployments.
    pub fn unprefixed() -> Self {
        Self {
            prefix: String::new(),
        }
    }

    pub fn from_tenant(tenant_id: Option<&str>) -> Self {
        match tenant_id {
            Some(id) if !id.is_empty() => Self::for_tenant(id),
            _ => Self::unprefixed(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn request_queue(&self) -> String {
        format!("{}{}", self.prefix, REQUEST_QUEUE)
    }

    pub fn response_key(&self, request_id: &str) -> String {
        format!("{}{}{}", self.prefix, RESPONSE_PREFIX, request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_prefix_is_applied_to_both_keys() {
        let names = QueueNames::for_tenant("t-42");
        assert_eq!(names.request_queue(), "tenant:t-42:trading:requests");
        assert_eq!(
            names.response_key("abc"),
            "tenant:t-42:trading:response:abc"
        );
    }

    #[test]
    fn empty_tenant_means_no_prefix() {
        let names = QueueNames::from_tenant(None);
        assert_eq!(names.request_queue(), "trading:requests");
        let names = QueueNames::from_tenant(Some(""));
        assert_eq!(names.response_key("x"), "trading:response:x");
    }
}
