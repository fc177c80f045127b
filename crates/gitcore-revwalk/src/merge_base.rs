//! Paint walks: merge bases and ahead/behind counts.
//!
//! Both start from two commits, each painted its own color, and walk
//! towards the roots newest first, handing colors down to parents. A commit
//! carrying both colors is common to both sides; whatever it paints is
//! stale. The walk ends once every queued commit is stale.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use gitcore_hash::ObjectId;

use crate::graph::CommitGraph;
use crate::RevWalkError;

const PARENT1: u8 = 1 << 0;
const PARENT2: u8 = 1 << 1;
const STALE: u8 = 1 << 2;
const RESULT: u8 = 1 << 3;
const BOTH: u8 = PARENT1 | PARENT2;

#[derive(PartialEq, Eq)]
struct Queued {
    time: i64,
    oid: ObjectId,
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.cmp(&other.time).then_with(|| other.oid.cmp(&self.oid))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Paint {
    flags: HashMap<ObjectId, u8>,
    queue: BinaryHeap<Queued>,
    /// Queue entries per commit; a commit is queued again for each new color.
    queued: HashMap<ObjectId, usize>,
    /// Queue entries whose commit is not stale.
    live: usize,
}

impl Paint {
    fn new(graph: &mut CommitGraph<'_>, one: &ObjectId, two: &ObjectId) -> Result<Self, RevWalkError> {
        let mut paint = Self {
            flags: HashMap::new(),
            queue: BinaryHeap::new(),
            queued: HashMap::new(),
            live: 0,
        };
        paint.add(graph, one, PARENT1)?;
        paint.add(graph, two, PARENT2)?;
        Ok(paint)
    }

    fn flags(&self, oid: &ObjectId) -> u8 {
        self.flags.get(oid).copied().unwrap_or(0)
    }

    /// Set `bits` on `oid`, retiring its queue entries when it turns stale.
    fn mark(&mut self, oid: &ObjectId, bits: u8) {
        let flags = self.flags.entry(*oid).or_insert(0);
        let before = *flags;
        *flags |= bits;
        if before & STALE == 0 && bits & STALE != 0 {
            self.live -= self.queued.get(oid).copied().unwrap_or(0);
        }
    }

    /// Paint `oid` with `color`; queue it when that adds anything.
    fn add(&mut self, graph: &mut CommitGraph<'_>, oid: &ObjectId, color: u8) -> Result<(), RevWalkError> {
        if self.flags(oid) & color == color {
            return Ok(());
        }
        let time = graph.time(oid)?;
        self.mark(oid, color);
        self.queue.push(Queued { time, oid: *oid });
        *self.queued.entry(*oid).or_insert(0) += 1;
        if self.flags(oid) & STALE == 0 {
            self.live += 1;
        }
        Ok(())
    }

    fn next(&mut self) -> Option<ObjectId> {
        if self.live == 0 {
            return None;
        }
        let oid = self.queue.pop()?.oid;
        if let Some(n) = self.queued.get_mut(&oid) {
            *n -= 1;
        }
        if self.flags(&oid) & STALE == 0 {
            self.live -= 1;
        }
        Some(oid)
    }
}

impl CommitGraph<'_> {
    /// Lowest common ancestors of `a` and `b`: common ancestors not
    /// reachable from another common ancestor. Newest first, ties by id.
    pub fn merge_bases(&mut self, a: &ObjectId, b: &ObjectId) -> Result<Vec<ObjectId>, RevWalkError> {
        if a == b {
            self.node(a)?;
            return Ok(vec![*a]);
        }
        let mut paint = Paint::new(self, a, b)?;
        let mut found = Vec::new();

        while let Some(oid) = paint.next() {
            let mut color = paint.flags(&oid) & (BOTH | STALE);
            if color & BOTH == BOTH {
                let flags = paint.flags.entry(oid).or_insert(0);
                if *flags & RESULT == 0 {
                    *flags |= RESULT;
                    found.push(oid);
                }
                color |= STALE;
            }
            for parent in self.node(&oid)?.parents.iter() {
                paint.add(self, parent, color)?;
            }
        }

        // A candidate painted stale later is an ancestor of another one.
        found.retain(|oid| paint.flags(oid) & STALE == 0);
        let mut bases = self.remove_redundant(found)?;
        let mut timed = Vec::with_capacity(bases.len());
        for oid in bases.drain(..) {
            timed.push((self.time(&oid)?, oid));
        }
        timed.sort_by(|x, y| y.0.cmp(&x.0).then(x.1.cmp(&y.1)));
        tracing::trace!(%a, %b, bases = timed.len(), "merge bases");
        Ok(timed.into_iter().map(|(_, oid)| oid).collect())
    }

    pub fn merge_base(&mut self, a: &ObjectId, b: &ObjectId) -> Result<Option<ObjectId>, RevWalkError> {
        Ok(self.merge_bases(a, b)?.into_iter().next())
    }

    /// Whether `ancestor` is reachable from `descendant` (a commit is its
    /// own ancestor).
    pub fn is_ancestor(&mut self, ancestor: &ObjectId, descendant: &ObjectId) -> Result<bool, RevWalkError> {
        if ancestor == descendant {
            return Ok(true);
        }
        let floor = self.time(ancestor)?;
        let mut queue = VecDeque::from([*descendant]);
        let mut seen = HashSet::from([*descendant]);
        while let Some(oid) = queue.pop_front() {
            if oid == *ancestor {
                return Ok(true);
            }
            let node = self.node(&oid)?;
            // Older than the target: only skewed clocks could still reach it.
            if node.time < floor && oid != *descendant {
                continue;
            }
            for parent in &node.parents {
                if seen.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
        }
        Ok(false)
    }

    fn remove_redundant(&mut self, candidates: Vec<ObjectId>) -> Result<Vec<ObjectId>, RevWalkError> {
        if candidates.len() < 2 {
            return Ok(candidates);
        }
        let mut keep = vec![true; candidates.len()];
        for i in 0..candidates.len() {
            for j in 0..candidates.len() {
                if i != j && keep[j] && self.is_ancestor(&candidates[i], &candidates[j])? {
                    keep[i] = false;
                    break;
                }
            }
        }
        Ok(candidates
            .into_iter()
            .zip(keep)
            .filter_map(|(oid, k)| k.then_some(oid))
            .collect())
    }

    /// `(ahead, behind)`: commits reachable only from `local`, and only
    /// from `upstream`.
    pub fn ahead_behind(&mut self, local: &ObjectId, upstream: &ObjectId) -> Result<(usize, usize), RevWalkError> {
        if local == upstream {
            return Ok((0, 0));
        }
        let mut paint = Paint::new(self, local, upstream)?;
        while let Some(oid) = paint.next() {
            if paint.flags(&oid) & BOTH == BOTH {
                paint.mark(&oid, STALE);
            }
            let color = paint.flags(&oid) & (BOTH | STALE);
            for parent in self.node(&oid)?.parents.iter() {
                paint.add(self, parent, color)?;
            }
        }

        let (mut ahead, mut behind) = (0, 0);
        for flags in paint.flags.values() {
            match flags & (BOTH | STALE) {
                PARENT1 => ahead += 1,
                PARENT2 => behind += 1,
                _ => {}
            }
        }
        tracing::trace!(%local, %upstream, ahead, behind, "ahead/behind");
        Ok((ahead, behind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::commit;
    use gitcore_odb::ObjectDatabase;

    #[test]
    fn linear_history() {
        let dir = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::open(dir.path()).unwrap();
        let c1 = commit(&odb, &[], 10);
        let c2 = commit(&odb, &[c1], 20);
        let c3 = commit(&odb, &[c2], 30);

        let mut graph = CommitGraph::new(&odb);
        assert_eq!(graph.merge_bases(&c1, &c3).unwrap(), [c1]);
        assert_eq!(graph.merge_bases(&c3, &c2).unwrap(), [c2]);
        assert_eq!(graph.merge_bases(&c2, &c2).unwrap(), [c2]);
        assert!(graph.is_ancestor(&c1, &c3).unwrap());
        assert!(!graph.is_ancestor(&c3, &c1).unwrap());
        assert_eq!(graph.ahead_behind(&c1, &c3).unwrap(), (0, 2));
        assert_eq!(graph.ahead_behind(&c3, &c1).unwrap(), (2, 0));
    }

    #[test]
    fn equal_timestamps_still_converge() {
        let dir = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::open(dir.path()).unwrap();
        let base = commit(&odb, &[], 50);
        let left = commit(&odb, &[base], 50);
        let right = commit(&odb, &[base], 50);

        let mut graph = CommitGraph::new(&odb);
        assert_eq!(graph.merge_bases(&left, &right).unwrap(), [base]);
        assert_eq!(graph.ahead_behind(&left, &right).unwrap(), (1, 1));
    }

    #[test]
    fn live_count_matches_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::open(dir.path()).unwrap();
        let root = commit(&odb, &[], 10);
        let x = commit(&odb, &[root], 20);
        let y = commit(&odb, &[root], 21);
        let left = commit(&odb, &[x, y], 30);
        let right = commit(&odb, &[y, x], 31);
        let a = commit(&odb, &[left], 40);
        let b = commit(&odb, &[right], 41);

        let mut graph = CommitGraph::new(&odb);
        let mut paint = Paint::new(&mut graph, &a, &b).unwrap();
        let mut steps = 0;
        loop {
            let live = paint.queue.iter().filter(|q| paint.flags(&q.oid) & STALE == 0).count();
            assert_eq!(paint.live, live);
            let Some(oid) = paint.next() else { break };
            steps += 1;
            if paint.flags(&oid) & BOTH == BOTH {
                paint.mark(&oid, STALE);
            }
            let color = paint.flags(&oid) & (BOTH | STALE);
            for parent in graph.node(&oid).unwrap().parents.iter() {
                paint.add(&mut graph, parent, color).unwrap();
            }
        }
        assert!(steps >= 4);
        assert!(paint.queue.iter().all(|q| paint.flags(&q.oid) & STALE != 0));
        assert_eq!(graph.merge_bases(&a, &b).unwrap(), [y, x]);
    }

    #[test]
    fn unrelated_histories_have_no_base() {
        let dir = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::open(dir.path()).unwrap();
        let a = commit(&odb, &[], 1);
        let b = commit(&odb, &[], 2);
        let mut graph = CommitGraph::new(&odb);
        assert!(graph.merge_bases(&a, &b).unwrap().is_empty());
        assert_eq!(graph.merge_base(&a, &b).unwrap(), None);
        assert_eq!(graph.ahead_behind(&a, &b).unwrap(), (1, 1));
    }
}
