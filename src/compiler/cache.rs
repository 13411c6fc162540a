// Program Cache: reuse linearized programs across identical graphs
//
// Two fingerprints: `from_program` hashes an instruction stream with sources
// expressed as program positions, so it does not depend on arena numbering;
// `from_graph` hashes the linearizer's input (reachable nodes, roots, target
// and program name) and is what `Linearizer` looks programs up by.

use crate::compiler::program::Program;
use crate::compiler::target::Target;
use crate::core::error::Result;
use crate::ir::graph::UOpGraph;
use crate::ir::node::NodeId;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cache key for linearized programs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    hash: [u8; 32],
}

impl CacheKey {
    /// Fingerprint a program
    pub fn from_program(program: &Program) -> Self {
        let mut hasher = Sha256::new();
        let positions: HashMap<usize, usize> = program
            .iter()
            .enumerate()
            .map(|(p, ins)| (ins.id, p))
            .collect();

        for ins in program.iter() {
            let uop = &ins.uop;
            hasher.update(format!("{:?}", uop.op).as_bytes());
            hasher.update(format!("{:?}", uop.dtype).as_bytes());
            hasher.update(format!("{:?}", uop.arg).as_bytes());
            hasher.update((uop.src.len() as u64).to_le_bytes());
            for s in &uop.src {
                // verified programs only reference earlier instructions
                let p = positions.get(s).copied().unwrap_or(usize::MAX);
                hasher.update((p as u64).to_le_bytes());
            }
        }

        Self::finish(hasher)
    }

    /// Fingerprint a linearization request
    pub fn from_graph(graph: &UOpGraph, roots: &[NodeId], target: &Target, name: &str) -> Result<Self> {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(target.name().as_bytes());
        hasher.update(format!("{:?}", target.features()).as_bytes());
        for id in graph.toposort(roots)? {
            let uop = graph.get(id)?;
            hasher.update((id as u64).to_le_bytes());
            hasher.update(format!("{:?}", uop.op).as_bytes());
            hasher.update(format!("{:?}", uop.dtype).as_bytes());
            hasher.update(format!("{:?}", uop.arg).as_bytes());
            hasher.update((uop.src.len() as u64).to_le_bytes());
            for &s in &uop.src {
                hasher.update((s as u64).to_le_bytes());
            }
        }
        hasher.update(b"roots");
        for &r in roots {
            hasher.update((r as u64).to_le_bytes());
        }
        Ok(Self::finish(hasher))
    }

    fn finish(hasher: Sha256) -> Self {
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self { hash }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Lowercase hex digest
    pub fn to_hex(&self) -> String {
        self.hash.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Cached program with its use count
#[derive(Debug, Clone)]
pub struct CachedProgram {
    pub program: Arc<Program>,
    pub use_count: usize,
}

/// Program cache with least-used eviction
#[derive(Debug)]
pub struct ProgramCache {
    cache: Mutex<HashMap<CacheKey, CachedProgram>>,
    max_entries: usize,
}

impl ProgramCache {
    /// Create a cache holding at most `max_entries` programs
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CachedProgram>> {
        // entries are inserted whole, so a poisoned map is still consistent
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Program>> {
        let mut cache = self.lock();
        cache.get_mut(key).map(|entry| {
            entry.use_count += 1;
            entry.program.clone()
        })
    }

    /// Insert a program under its own fingerprint
    pub fn insert(&self, program: Program) -> (CacheKey, Arc<Program>) {
        let key = CacheKey::from_program(&program);
        let program = self.insert_as(key.clone(), program);
        (key, program)
    }

    /// Insert a program under `key`; an existing entry wins
    pub fn insert_as(&self, key: CacheKey, program: Program) -> Arc<Program> {
        let program = Arc::new(program);
        let mut cache = self.lock();
        if let Some(existing) = cache.get_mut(&key) {
            existing.use_count += 1;
            return existing.program.clone();
        }
        while cache.len() >= self.max_entries {
            Self::evict_least_used(&mut cache);
        }
        cache.insert(
            key.clone(),
            CachedProgram {
                program: program.clone(),
                use_count: 1,
            },
        );
        log::debug!("cached program {} ({} entries)", key.to_hex(), cache.len());
        program
    }

    fn evict_least_used(cache: &mut HashMap<CacheKey, CachedProgram>) {
        // ties go to the smallest key so eviction is deterministic
        if let Some(key) = cache
            .iter()
            .min_by(|(ka, a), (kb, b)| a.use_count.cmp(&b.use_count).then(ka.hash.cmp(&kb.hash)))
            .map(|(k, _)| k.clone())
        {
            log::trace!("evicting program {}", key.to_hex());
            cache.remove(&key);
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.lock();
        CacheStats {
            num_entries: cache.len(),
            total_uses: cache.values().map(|e| e.use_count).sum(),
            max_entries: self.max_entries,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub num_entries: usize,
    pub total_uses: usize,
    pub max_entries: usize,
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new(256)
    }
}
