//! Permanent identifier issuing.
//!
//! The resolver asks an issuer for exactly one identifier per record, once
//! per run. Implementations may call out to a remote service; the default
//! generates identifiers locally.

use crate::error::{PackagerError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use uuid::Uuid;

/// Length of generated identifiers.
pub const ID_LENGTH: usize = 20;

/// Source of permanent record identifiers.
#[async_trait]
pub trait IdIssuer: Send + Sync {
    /// Hand back `count` identifiers, unique within the run.
    async fn issue(&self, count: usize) -> Result<Vec<String>>;
}

/// Issues lower-case 20-character hex tokens cut from random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdIssuer;

impl RandomIdIssuer {
    pub fn new() -> Self {
        Self
    }

    fn token() -> String {
        let mut token = Uuid::new_v4().simple().to_string();
        token.truncate(ID_LENGTH);
        token
    }
}

#[async_trait]
impl IdIssuer for RandomIdIssuer {
    async fn issue(&self, count: usize) -> Result<Vec<String>> {
        let mut seen = HashSet::with_capacity(count);
        let mut ids = Vec::with_capacity(count);
        while ids.len() < count {
            let token = Self::token();
            if seen.insert(token.clone()) {
                ids.push(token);
            }
        }
        Ok(ids)
    }
}

/// Ask `issuer` for `count` identifiers and check it kept its contract.
pub async fn acquire(issuer: &dyn IdIssuer, count: usize) -> Result<Vec<String>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let ids = issuer.issue(count).await?;
    if ids.len() != count {
        return Err(PackagerError::IdCountMismatch {
            expected: count,
            actual: ids.len(),
        });
    }
    Ok(ids)
}
