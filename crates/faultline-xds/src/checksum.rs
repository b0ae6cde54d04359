//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Discovery resource generation, caching, and polling."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::Result;

/// Content-addressed version string for a resource payload.
///
/// The payload is serialized to canonical JSON (map keys sorted by the
/// payload types themselves) and hashed, so equal payloads always
/// produce equal versions and any field change produces a new one.
/// This is what gates snapshot writes.
pub fn content_version<T: Serialize>(payload: &T) -> Result<String> {
    let encoded = serde_json::to_vec(payload)?;
    Ok(format!("{:x}", Sha256::digest(&encoded)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::RuntimeLayer;

    #[test]
    fn stable_across_calls() {
        let layer = RuntimeLayer::new("TestRtdsLayer");
        let first = content_version(&layer).unwrap();
        let second = content_version(&layer).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn sensitive_to_any_field() {
        let layer = RuntimeLayer::new("TestRtdsLayer");
        let renamed = RuntimeLayer::new("RenamedLayer");
        assert_ne!(
            content_version(&layer).unwrap(),
            content_version(&renamed).unwrap()
        );

        let mut populated = RuntimeLayer::new("TestRtdsLayer");
        populated.layer.insert("fault.http.abort.abort_percent".to_owned(), 10);
        assert_ne!(
            content_version(&layer).unwrap(),
            content_version(&populated).unwrap()
        );
    }
}
