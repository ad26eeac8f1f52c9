//! Recipe construction and permission matching.
//!
//! Every session type maps to a base permission set; custom permissions
//! merge on top only for `CustomMacaroon` sessions. Matching supports
//! exact entity/action pairs and, on the `uri` entity, exact URIs, URI
//! regular expressions and the read-only keyword.

use std::collections::HashMap;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;

use warden_core::error::SessionError;
use warden_core::id::AccountId;
use warden_core::macaroon::{MacaroonRecipe, Permission, READONLY_URI_KEYWORD};
use warden_core::types::SessionType;

/// URIs belonging to the read-only API surface, matched by the
/// [`READONLY_URI_KEYWORD`] shortcut.
const READONLY_URIS: &[&str] = &[
    "/lnrpc.Lightning/GetInfo",
    "/lnrpc.Lightning/GetNetworkInfo",
    "/lnrpc.Lightning/ListChannels",
    "/lnrpc.Lightning/ListPeers",
    "/lnrpc.Lightning/ListInvoices",
    "/lnrpc.Lightning/ListPayments",
    "/lnrpc.Lightning/ChannelBalance",
    "/lnrpc.Lightning/WalletBalance",
    "/lnrpc.Lightning/PendingChannels",
    "/lnrpc.Lightning/FeeReport",
    "/lnrpc.Lightning/GetTransactions",
    "/lnrpc.Lightning/DescribeGraph",
];

lazy_static! {
    /// Compiled URI regexes, cached by pattern.
    static ref REGEX_CACHE: RwLock<HashMap<String, Option<Regex>>> =
        RwLock::new(HashMap::new());
}

/// Returns true if the URI belongs to the read-only surface.
pub fn is_readonly_uri(uri: &str) -> bool {
    READONLY_URIS.contains(&uri)
}

/// The base permission set of a session type.
pub fn base_permissions(session_type: SessionType) -> Vec<Permission> {
    match session_type {
        SessionType::ReadOnlyMacaroon | SessionType::UiPassword => {
            vec![Permission::new("uri", READONLY_URI_KEYWORD)]
        }
        SessionType::AdminMacaroon => vec![
            Permission::new("info", "read"),
            Permission::new("info", "write"),
            Permission::new("onchain", "read"),
            Permission::new("onchain", "write"),
            Permission::new("offchain", "read"),
            Permission::new("offchain", "write"),
            Permission::new("invoices", "read"),
            Permission::new("invoices", "write"),
            Permission::new("peers", "read"),
            Permission::new("peers", "write"),
            Permission::new("message", "read"),
            Permission::new("message", "write"),
        ],
        SessionType::Autopilot => vec![
            Permission::new("uri", READONLY_URI_KEYWORD),
            Permission::new("offchain", "read"),
            Permission::new("offchain", "write"),
            Permission::new("onchain", "read"),
            Permission::new("onchain", "write"),
        ],
        SessionType::AccountMacaroon => vec![
            Permission::new("info", "read"),
            Permission::new("invoices", "read"),
            Permission::new("invoices", "write"),
            Permission::new("offchain", "read"),
            Permission::new("offchain", "write"),
        ],
        // Custom macaroons start from the read-only surface; the caller's
        // permissions merge on top.
        SessionType::CustomMacaroon => {
            vec![Permission::new("uri", READONLY_URI_KEYWORD)]
        }
    }
}

/// Build the write-once recipe for a new session.
///
/// Custom permissions are only permitted for `CustomMacaroon` sessions;
/// account macaroons get a caveat locking them to their account.
pub fn build_recipe(
    session_type: SessionType,
    custom_permissions: Option<&[Permission]>,
    account_id: Option<&AccountId>,
) -> Result<MacaroonRecipe, SessionError> {
    let mut permissions = base_permissions(session_type);

    if let Some(custom) = custom_permissions {
        if session_type != SessionType::CustomMacaroon {
            return Err(SessionError::CustomPermissionsNotAllowed(session_type));
        }
        for permission in custom {
            if !permissions.contains(permission) {
                permissions.push(permission.clone());
            }
        }
    }

    let mut caveats = Vec::new();
    if let Some(id) = account_id {
        caveats.push(format!("account {id}"));
    }

    Ok(MacaroonRecipe::new(permissions, caveats))
}

/// Check a recipe against a requested `(entity, action)` pair.
///
/// Non-`uri` permissions match exactly. `uri` permissions match an exact
/// URI, the read-only keyword, or a regular expression over the full URI.
pub fn permits(recipe: &MacaroonRecipe, entity: &str, action: &str) -> bool {
    recipe.permissions.iter().any(|permission| {
        if permission.entity != entity {
            return false;
        }
        if permission.action == action {
            return true;
        }
        if permission.entity == "uri" {
            if permission.action == READONLY_URI_KEYWORD {
                return is_readonly_uri(action);
            }
            return regex_matches(&permission.action, action);
        }
        false
    })
}

/// Match a URI against a cached, fully-anchored regex pattern. Patterns
/// that fail to compile never match.
fn regex_matches(pattern: &str, uri: &str) -> bool {
    if let Some(cached) = REGEX_CACHE.read().get(pattern) {
        return cached.as_ref().map(|re| re.is_match(uri)).unwrap_or(false);
    }

    let compiled = Regex::new(&format!("^(?:{pattern})$")).ok();
    let matches = compiled.as_ref().map(|re| re.is_match(uri)).unwrap_or(false);
    REGEX_CACHE.write().insert(pattern.to_string(), compiled);
    matches
}
