//! Shared User-Agent string for all archive HTTP traffic.
//!
//! Single source for the UA format so query, retrieval and auth traffic
//! stay consistent and easy to update (good citizenship; RFC 9308).

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/esoarc";

/// Default User-Agent identifying the tool and version.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("esoarc/{version} (archive-client; +{PROJECT_UA_URL})")
}
