use crate::library::{self, ModInfo, ModRecord};
use anyhow::Result;
use regex::Regex;
use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    path::Path,
    sync::{Mutex, MutexGuard, OnceLock, PoisonError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The id existed as a dependency and has been promoted to a main mod.
    Promoted,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependent {
    pub id: String,
    pub title: String,
}

/// A mod about to be deleted that other mods still require.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyWarning {
    pub id: String,
    pub title: String,
    pub dependents: Vec<Dependent>,
}

impl DependencyWarning {
    pub fn message(&self) -> String {
        let names: Vec<&str> = self.dependents.iter().map(|dep| dep.title.as_str()).collect();
        format!("'{}' is required by: {}", self.title, names.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyEntry {
    pub record: ModRecord,
    pub depth: usize,
}

/// Thread-safe owner of the mod list. Every read hands out a copy.
#[derive(Debug, Default)]
pub struct ModRepository {
    mods: Mutex<Vec<ModRecord>>,
}

impl ModRepository {
    pub fn new(mods: Vec<ModRecord>) -> Self {
        Self {
            mods: Mutex::new(mods),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(library::load_mods(path)?))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let snapshot = self.all();
        library::save_mods(path, &snapshot)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ModRecord>> {
        self.mods.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn all(&self) -> Vec<ModRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<ModRecord> {
        self.lock().iter().find(|record| record.id == id).cloned()
    }

    pub fn get_by_index(&self, index: usize) -> Option<ModRecord> {
        self.lock().get(index).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().iter().any(|record| record.id == id)
    }

    pub fn add_by_id(&self, id: &str, is_dependency: bool) -> AddOutcome {
        let mut mods = self.lock();
        if let Some(existing) = mods.iter_mut().find(|record| record.id == id) {
            if !is_dependency && existing.is_dependency {
                existing.is_dependency = false;
                return AddOutcome::Promoted;
            }
            return AddOutcome::Unchanged;
        }
        mods.push(ModRecord::placeholder(id, is_dependency));
        AddOutcome::Added
    }

    /// Accepts a Workshop page URL and adds it as a main mod, returning its id.
    pub fn add_by_url(&self, url: &str) -> Option<String> {
        let id = extract_mod_id(url)?;
        self.add_by_id(&id, false);
        Some(id)
    }

    pub fn remove_by_index(&self, index: usize) -> Option<ModRecord> {
        let mut mods = self.lock();
        if index < mods.len() {
            Some(mods.remove(index))
        } else {
            None
        }
    }

    pub fn remove_by_id(&self, id: &str) -> Option<ModRecord> {
        let mut mods = self.lock();
        let index = mods.iter().position(|record| record.id == id)?;
        Some(mods.remove(index))
    }

    pub fn update_info(&self, id: &str, info: ModInfo) -> bool {
        let mut mods = self.lock();
        match mods.iter_mut().find(|record| record.id == id) {
            Some(record) => {
                record.info = info;
                true
            }
            None => false,
        }
    }

    pub fn update_description(&self, id: &str, description: String) -> bool {
        let mut mods = self.lock();
        match mods.iter_mut().find(|record| record.id == id) {
            Some(record) => {
                record.info.description = description;
                true
            }
            None => false,
        }
    }

    pub fn mark_as_dependency(&self, id: &str) -> bool {
        self.set_dependency_flag(id, true)
    }

    pub fn mark_as_main(&self, id: &str) -> bool {
        self.set_dependency_flag(id, false)
    }

    fn set_dependency_flag(&self, id: &str, flag: bool) -> bool {
        let mut mods = self.lock();
        match mods.iter_mut().find(|record| record.id == id) {
            Some(record) if record.is_dependency != flag => {
                record.is_dependency = flag;
                true
            }
            _ => false,
        }
    }

    pub fn find_dependents(&self, id: &str) -> Vec<ModRecord> {
        self.lock()
            .iter()
            .filter(|record| record.id != id && record.info.dependencies.iter().any(|dep| dep == id))
            .cloned()
            .collect()
    }

    pub fn transitive_dependencies(&self, seeds: &BTreeSet<String>) -> BTreeSet<String> {
        let graph: HashMap<String, Vec<String>> = self
            .lock()
            .iter()
            .map(|record| (record.id.clone(), record.info.dependencies.clone()))
            .collect();
        dependency_closure(&graph, seeds)
    }

    /// Mods in `ids` that are still required by a mod outside the deletion set.
    pub fn dependency_warnings(&self, ids: &[String]) -> Vec<DependencyWarning> {
        let deleting: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mods = self.lock();
        let mut warnings = Vec::new();
        for id in ids {
            let Some(target) = mods.iter().find(|record| &record.id == id) else {
                continue;
            };
            let dependents: Vec<Dependent> = mods
                .iter()
                .filter(|record| {
                    !deleting.contains(record.id.as_str())
                        && record.info.dependencies.iter().any(|dep| dep == id)
                })
                .map(|record| Dependent {
                    id: record.id.clone(),
                    title: record.display_title().to_string(),
                })
                .collect();
            if !dependents.is_empty() {
                warnings.push(DependencyWarning {
                    id: id.clone(),
                    title: target.display_title().to_string(),
                    dependents,
                });
            }
        }
        warnings
    }

    pub fn hierarchy(&self) -> Vec<HierarchyEntry> {
        build_hierarchy(&self.lock())
    }
}

fn workshop_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"steamcommunity\.com/(?:sharedfiles|workshop)/filedetails/\?.*id=(\d+)")
            .expect("workshop url pattern")
    })
}

pub fn extract_mod_id(url: &str) -> Option<String> {
    workshop_id_regex()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}

/// Accepts either a Workshop URL or a bare numeric id.
pub fn parse_mod_input(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        return Some(trimmed.to_string());
    }
    extract_mod_id(trimmed)
}

/// Every id reachable from `seeds` through dependency edges. Seeds appear in
/// the result only when another reachable mod requires them.
pub fn dependency_closure(
    graph: &HashMap<String, Vec<String>>,
    seeds: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut result = BTreeSet::new();
    let mut processed: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = seeds.iter().cloned().collect();
    while let Some(id) = queue.pop_front() {
        if !processed.insert(id.clone()) {
            continue;
        }
        let Some(deps) = graph.get(&id) else {
            continue;
        };
        for dep in deps {
            result.insert(dep.clone());
            if !processed.contains(dep) {
                queue.push_back(dep.clone());
            }
        }
    }
    result
}

/// Flattens the list into display order: main mods (and orphaned dependencies)
/// as roots, each followed by its dependency subtree. Every record is emitted
/// exactly once even when the graph is a diamond or contains cycles.
pub fn build_hierarchy(mods: &[ModRecord]) -> Vec<HierarchyEntry> {
    let by_id: HashMap<&str, &ModRecord> =
        mods.iter().map(|record| (record.id.as_str(), record)).collect();
    let required: HashSet<&str> = mods
        .iter()
        .flat_map(|record| record.info.dependencies.iter().map(String::as_str))
        .collect();

    let mut emitted: HashSet<&str> = HashSet::new();
    let mut out = Vec::with_capacity(mods.len());

    let roots = mods
        .iter()
        .filter(|record| !record.is_dependency || !required.contains(record.id.as_str()));
    for root in roots.chain(mods.iter()) {
        if emitted.contains(root.id.as_str()) {
            continue;
        }
        let mut stack: Vec<(&ModRecord, usize, HashSet<&str>)> = vec![(root, 0, HashSet::new())];
        while let Some((record, depth, mut path)) = stack.pop() {
            if !emitted.insert(record.id.as_str()) {
                continue;
            }
            path.insert(record.id.as_str());
            out.push(HierarchyEntry {
                record: record.clone(),
                depth,
            });
            for dep_id in record.info.dependencies.iter().rev() {
                if path.contains(dep_id.as_str()) || emitted.contains(dep_id.as_str()) {
                    continue;
                }
                if let Some(dep) = by_id.get(dep_id.as_str()) {
                    stack.push((dep, depth + 1, path.clone()));
                }
            }
        }
    }
    out
}
