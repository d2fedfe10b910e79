// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Node identities and signature checks over Merkle roots.

use crate::error::{ReplayError, Result};
use crate::merkle::Hash;
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCertificate {
    node_id: u64,
    key: VerifyingKey,
}

impl NodeCertificate {
    pub fn new(node_id: u64, key: VerifyingKey) -> Self {
        Self { node_id, key }
    }

    pub fn from_bytes(node_id: u64, public_key: &[u8; 32]) -> Result<Self> {
        let key = VerifyingKey::from_bytes(public_key)
            .map_err(|e| ReplayError::Codec(format!("node {} public key: {}", node_id, e)))?;
        Ok(Self { node_id, key })
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.key
    }
}

/// Lookup of node certificates by id.
pub trait NodeRegistry {
    fn certificate(&self, node_id: u64) -> Option<NodeCertificate>;
}

impl NodeRegistry for HashMap<u64, NodeCertificate> {
    fn certificate(&self, node_id: u64) -> Option<NodeCertificate> {
        self.get(&node_id).cloned()
    }
}

impl<T: NodeRegistry + ?Sized> NodeRegistry for &T {
    fn certificate(&self, node_id: u64) -> Option<NodeCertificate> {
        (**self).certificate(node_id)
    }
}

/// Adapts a lookup closure.
pub struct RegistryFn<F>(pub F);

impl<F> NodeRegistry for RegistryFn<F>
where
    F: Fn(u64) -> Option<NodeCertificate>,
{
    fn certificate(&self, node_id: u64) -> Option<NodeCertificate> {
        (self.0)(node_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid,
}

impl Verdict {
    pub fn is_valid(self) -> bool {
        self == Verdict::Valid
    }
}

/// Checks `signature` over `root`. A malformed signature is `Invalid`, not an error.
pub fn verify_root(cert: &NodeCertificate, root: &Hash, signature: &[u8]) -> Verdict {
    let Ok(sig) = Signature::from_slice(signature) else {
        return Verdict::Invalid;
    };
    match cert.key.verify(root, &sig) {
        Ok(()) => Verdict::Valid,
        Err(_) => Verdict::Invalid,
    }
}
