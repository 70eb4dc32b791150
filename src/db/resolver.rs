//! The resolution engine: which object satisfies which soname, and the
//! full-graph relink.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use log::debug;

use crate::elf::Elf;
use crate::paths::pathlist_contains;

use super::{Db, ObjectId};

/// How many workers to use for `max_jobs`; `0` means all CPUs, `1`
/// forces the serial path.
pub(crate) fn worker_count(max_jobs: usize) -> usize {
    let cpus = thread::available_parallelism().map_or(1, |n| n.get());
    if max_jobs == 0 { cpus } else { max_jobs.min(cpus) }
}

impl Db {
    /// Would the linker, running as `elf`, search `path`?
    ///
    /// Priority order: DT_RPATH, DT_RUNPATH, the trusted paths `/lib` and
    /// `/usr/lib`, the database's library path, then the per-package
    /// `extra` list. `LD_LIBRARY_PATH` has no business in a virtual
    /// install and is deliberately absent.
    pub(crate) fn finds(&self, elf: &Elf, path: &str, extra: Option<&Vec<String>>) -> bool {
        if let Some(rpath) = &elf.rpath
            && pathlist_contains(rpath, path)
        {
            return true;
        }
        if let Some(runpath) = &elf.runpath
            && pathlist_contains(runpath, path)
        {
            return true;
        }
        if path == "/lib" || path == "/usr/lib" {
            return true;
        }
        if self.library_path.iter().any(|p| p == path) {
            return true;
        }
        if let Some(extra) = extra
            && extra.iter().any(|p| p == path)
        {
            return true;
        }
        false
    }

    /// Find the first object `obj` can use to satisfy `needed`.
    ///
    /// Scans the flat object list in insertion order; that order is the
    /// deterministic tiebreak and survives save/load.
    pub fn find_for(
        &self,
        obj: &Elf,
        needed: &str,
        extra: Option<&Vec<String>>,
    ) -> Option<ObjectId> {
        debug!("dependency of {}: {}", obj.path(), needed);
        for &id in &self.objects {
            let lib = &self.pool[&id];
            if !obj.can_use(&lib.elf, self.strict_linking) {
                debug!("  skipping {} (objclass)", lib.elf.path());
                continue;
            }
            if lib.elf.basename != needed {
                continue;
            }
            if !self.finds(obj, &lib.elf.dirname, extra) {
                debug!("  skipping {} (not visible)", lib.elf.path());
                continue;
            }
            return Some(id);
        }
        None
    }

    /// Compute the resolution of one object: a set of found objects and a
    /// set of missing sonames. Ignored objects resolve to nothing;
    /// assumed-found sonames never count as missing.
    pub(crate) fn link_object(&self, id: ObjectId) -> (BTreeSet<ObjectId>, BTreeSet<String>) {
        let mut found = BTreeSet::new();
        let mut missing = BTreeSet::new();

        let obj = &self.pool[&id];
        if !self.ignore_file_rules.is_empty() && self.ignore_file_rules.contains(&obj.elf.path())
        {
            return (found, missing);
        }

        let extra = self.pkg_libpath(&obj.owner);
        for needed in &obj.elf.needed {
            match self.find_for(&obj.elf, needed, extra) {
                Some(lib) => {
                    found.insert(lib);
                }
                None => {
                    if !self.assume_found_rules.contains(needed) {
                        missing.insert(needed.clone());
                    }
                }
            }
        }
        (found, missing)
    }

    /// Rebuild every object's resolution from scratch.
    ///
    /// Used after bulk rule-store mutation; rule mutators never relink on
    /// their own. Large databases are relinked on a worker pool, with
    /// results identical to the serial path.
    pub fn relink_all(&mut self, max_jobs: usize, show_progress: bool) {
        if self.packages.is_empty() {
            return;
        }

        let workers = worker_count(max_jobs);
        if max_jobs != 1 && workers > 1 && self.packages.len() > 100 && self.objects.len() >= 300
        {
            return self.relink_all_threaded(workers, show_progress);
        }

        let total = self.packages.len();
        let mut progress = Progress::new(total, 1, show_progress);
        for i in 0..total {
            let ids = self.packages[i].objects.clone();
            for id in ids {
                let (found, missing) = self.link_object(id);
                let obj = self.pool.get_mut(&id).expect("linked object in pool");
                obj.req_found = found;
                obj.req_missing = missing;
            }
            progress.update(i + 1);
        }
        progress.finish();
    }

    fn relink_all_threaded(&mut self, workers: usize, show_progress: bool) {
        type ResultMap = HashMap<ObjectId, (BTreeSet<ObjectId>, BTreeSet<String>)>;

        let total = self.packages.len();
        let per_worker = total / workers;
        let counter = AtomicUsize::new(0);

        let results: Vec<ResultMap> = thread::scope(|scope| {
            let db = &*self;
            let counter = &counter;

            let handles: Vec<_> = (0..workers)
                .map(|w| {
                    let from = w * per_worker;
                    let to = if w == workers - 1 {
                        total
                    } else {
                        from + per_worker
                    };
                    scope.spawn(move || {
                        let mut map = ResultMap::new();
                        for pkg in &db.packages[from..to] {
                            for &id in &pkg.objects {
                                map.insert(id, db.link_object(id));
                            }
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                        map
                    })
                })
                .collect();

            // Sample the shared counter at roughly 10 Hz for the status
            // line while the workers run.
            let mut progress = Progress::new(total, workers, show_progress);
            if show_progress {
                loop {
                    let at = counter.load(Ordering::Relaxed);
                    progress.update(at);
                    if at == total {
                        break;
                    }
                    thread::sleep(Duration::from_millis(100));
                }
            }

            let results = handles
                .into_iter()
                .map(|h| h.join().expect("relink worker panicked"))
                .collect();
            progress.finish();
            results
        });

        // Single-threaded merge: the only writer of the live result sets.
        for map in results {
            for (id, (found, missing)) in map {
                let obj = self.pool.get_mut(&id).expect("linked object in pool");
                obj.req_found = found;
                obj.req_missing = missing;
            }
        }
    }
}

/// Percent-stepped `\r` status line for long passes.
pub(crate) struct Progress {
    total: usize,
    workers: usize,
    enabled: bool,
    last_pc: usize,
}

impl Progress {
    pub(crate) fn new(total: usize, workers: usize, enabled: bool) -> Self {
        let mut p = Progress {
            total,
            workers,
            enabled,
            last_pc: usize::MAX,
        };
        p.update(0);
        p
    }

    pub(crate) fn update(&mut self, at: usize) {
        if !self.enabled || self.total == 0 {
            return;
        }
        let pc = at * 100 / self.total;
        if pc == self.last_pc {
            return;
        }
        self.last_pc = pc;
        print!(
            "\rrelinking: {:3}% ({} / {} packages) [{}]",
            pc, at, self.total, self.workers
        );
        let _ = std::io::stdout().flush();
    }

    pub(crate) fn finish(&mut self) {
        if self.enabled {
            self.update(self.total);
            println!();
        }
    }
}
