// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod cbor;
pub mod hash;
pub mod identity;
pub mod key;
pub mod rng;
mod serde;

pub use hash::{HASH_LEN, Hash, HashError};
pub use identity::{
    ADDRESS_LEN, AccountAddress, BoxPublicKey, IdentityError, PrivateKey, PublicKey, SIGNATURE_LEN,
    Signature,
};
pub use key::{KEY_LEN, KeyError, SymmetricKey};
pub use rng::{Rng, RngError};
