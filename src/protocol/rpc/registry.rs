//! Table of the programs served by a Courier server.
//!
//! Programs are keyed by program number and version. The table is shared by
//! all connections; a lookup clones the program's `Arc` so the lock is never
//! held while a procedure runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use super::context::{ConnectionClient, Transaction};
use super::program::Program;
use crate::protocol::courier::message::{self, RejectCode, VersionRange};
use crate::protocol::wire::{WireResult, WireStream, SST_RPC};

#[derive(Default)]
pub struct Registry {
    programs: RwLock<HashMap<(u32, u16), Arc<Program>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a program, replacing a registered one with the same number and version.
    ///
    /// # Returns
    ///
    /// The replaced program, if any.
    pub fn register(&self, program: Program) -> Option<Arc<Program>> {
        let key = (program.number(), program.version());
        info!("registering program {} ({} version {})", program.name(), key.0, key.1);
        self.programs.write().unwrap_or_else(PoisonError::into_inner).insert(key, Arc::new(program))
    }

    /// Removes every version of program `number`.
    ///
    /// # Returns
    ///
    /// The number of removed versions.
    pub fn unregister(&self, number: u32) -> usize {
        let mut programs = self.programs.write().unwrap_or_else(PoisonError::into_inner);
        let before = programs.len();
        programs.retain(|(n, _), _| *n != number);
        let removed = before - programs.len();
        if removed > 0 {
            info!("unregistered program {} ({} versions)", number, removed);
        }
        removed
    }

    /// Removes one version of program `number`.
    pub fn unregister_version(&self, number: u32, version: u16) -> Option<Arc<Program>> {
        let removed = self
            .programs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(number, version));
        if removed.is_some() {
            info!("unregistered program {} version {}", number, version);
        }
        removed
    }

    pub fn is_registered(&self, number: u32, version: u16) -> bool {
        self.lookup(number, version).is_some()
    }

    pub fn lookup(&self, number: u32, version: u16) -> Option<Arc<Program>> {
        self.programs.read().unwrap_or_else(PoisonError::into_inner).get(&(number, version)).cloned()
    }

    /// Lowest and highest registered version of program `number`, if any
    /// version is registered.
    pub fn version_range(&self, number: u32) -> Option<VersionRange> {
        let programs = self.programs.read().unwrap_or_else(PoisonError::into_inner);
        let mut versions = programs.keys().filter(|(n, _)| *n == number).map(|(_, v)| *v);
        let first = versions.next()?;
        Some(versions.fold(VersionRange::new(first, first), |range, v| {
            VersionRange::new(range.low.min(v), range.high.max(v))
        }))
    }

    /// All registered programs ordered by number and version.
    pub fn programs(&self) -> Vec<Arc<Program>> {
        let mut programs: Vec<_> =
            self.programs.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect();
        programs.sort_by_key(|p| (p.number(), p.version()));
        programs
    }

    /// Routes a call whose message type and transaction id have been read.
    ///
    /// Reads the program number and version, then hands the call to the
    /// matching program. Calls to unknown programs or versions are drained and
    /// answered with a reject.
    pub fn dispatch(
        &self,
        transaction: &Transaction,
        stream: &mut dyn WireStream,
    ) -> WireResult<Option<Box<dyn ConnectionClient>>> {
        let number = message::read_program_number(stream, transaction.courier_version)?;
        let version = stream.read_u16()?;
        if let Some(program) = self.lookup(number, version) {
            return program.dispatch(transaction, stream);
        }

        let procedure = stream.read_u16()?;
        stream.drop_to_end_of_message(SST_RPC)?;
        match self.version_range(number) {
            None => {
                warn!(
                    "{}: no program {} (version {}, procedure {})",
                    transaction.connection_id, number, version, procedure
                );
                message::write_reject(stream, transaction.id, RejectCode::NoSuchProgram, None)?;
            }
            Some(range) => {
                warn!(
                    "{}: program {} has no version {}, registered {}..={}",
                    transaction.connection_id, number, version, range.low, range.high
                );
                let range = (transaction.courier_version == 3).then_some(range);
                message::write_reject(stream, transaction.id, RejectCode::NoSuchVersion, range)?;
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("rpc::Registry").field("programs", &self.programs()).finish()
    }
}
