//! Macaroon recipe model and external signer traits.
//!
//! The cryptographic construction of macaroons is out of scope for this
//! core; minting and verification happen behind the [`MacaroonSigner`]
//! trait. What this module owns is the *recipe*: the write-once list of
//! permissions and caveats a macaroon is minted from.

use serde::{Deserialize, Serialize};

use crate::error::SignerError;
use crate::id::AccountId;

/// The literal action keyword on the `uri` entity that grants every
/// read-only endpoint at once.
pub const READONLY_URI_KEYWORD: &str = "***readonly***";

/// A single `(entity, action)` permission pair.
///
/// For `entity == "uri"` the action is an exact URI, a URI regular
/// expression, or [`READONLY_URI_KEYWORD`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// The entity the permission applies to.
    pub entity: String,

    /// The permitted action on that entity.
    pub action: String,
}

impl Permission {
    /// Convenience constructor.
    pub fn new(entity: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            action: action.into(),
        }
    }
}

/// An immutable description of the macaroon to mint for a session or
/// account: ordered permissions plus ordered caveat strings.
///
/// Recipes are write-once. Once attached to a session or account they are
/// never mutated, only superseded by minting a new session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacaroonRecipe {
    /// Ordered permission pairs.
    pub permissions: Vec<Permission>,

    /// Ordered caveat strings to bake into the macaroon.
    pub caveats: Vec<String>,
}

impl MacaroonRecipe {
    /// Create a recipe from permission pairs and caveats.
    pub fn new(permissions: Vec<Permission>, caveats: Vec<String>) -> Self {
        Self {
            permissions,
            caveats,
        }
    }
}

/// The result of minting a macaroon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MintedMacaroon {
    /// The serialized macaroon credential.
    pub macaroon: Vec<u8>,

    /// Pairing secret material generated alongside the credential, handed
    /// to the remote party during the pairing handshake.
    pub pairing_secret: Vec<u8>,
}

/// The identity the external verifier extracts from a presented macaroon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MacaroonIdentity {
    /// A macaroon minted for a session, identified by its root key.
    Session(Vec<u8>),

    /// A bare account-scoped macaroon.
    Account(AccountId),
}

/// The external macaroon signer.
///
/// Treated as trusted, synchronous and fallible. A failed mint aborts the
/// enclosing create operation; nothing is persisted in that case.
pub trait MacaroonSigner: Send + Sync {
    /// Mint a macaroon for the given root key material and recipe.
    fn mint(
        &self,
        root_key: &[u8],
        recipe: &MacaroonRecipe,
    ) -> Result<MintedMacaroon, SignerError>;
}
