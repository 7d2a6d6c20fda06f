//! Structural verification used by tests.
//!
//! Walks the whole tree and checks: the header's entry count against
//! the actual number of leaf entries, occupancy bounds on every
//! non-root page, strictly increasing keys confined to the bounds
//! inherited from the path, child-pointer validity, and the
//! consistency of the doubly-linked leaf chain.

use crate::btree::tree::BPlusTree;
use crate::btree::{branch, leaf};
use crate::error::{IndexError, Result};
use crate::keys::Key;
use crate::types::PageId;

struct LeafLink {
    id: PageId,
    prev: PageId,
    next: PageId,
}

struct CheckState {
    entries: u64,
    leaves: Vec<LeafLink>,
}

pub(crate) fn verify(tree: &BPlusTree) -> Result<()> {
    let mut state = CheckState {
        entries: 0,
        leaves: Vec::new(),
    };
    visit(tree, tree.root(), None, None, true, &mut state)?;

    let size = tree.size() as u64;
    if state.entries != size {
        return Err(IndexError::invariant(format!(
            "header records {} entries but the leaves hold {}",
            size, state.entries
        )));
    }

    for (i, link) in state.leaves.iter().enumerate() {
        let want_prev = if i == 0 {
            PageId::INVALID
        } else {
            state.leaves[i - 1].id
        };
        let want_next = if i + 1 == state.leaves.len() {
            PageId::INVALID
        } else {
            state.leaves[i + 1].id
        };
        if link.prev != want_prev {
            return Err(IndexError::invariant(format!(
                "leaf {} has prev {} but the chain expects {}",
                link.id, link.prev, want_prev
            )));
        }
        if link.next != want_next {
            return Err(IndexError::invariant(format!(
                "leaf {} has next {} but the chain expects {}",
                link.id, link.next, want_next
            )));
        }
    }

    Ok(())
}

fn visit(
    tree: &BPlusTree,
    page_id: PageId,
    lower: Option<&Key>,
    upper: Option<&Key>,
    is_root: bool,
    state: &mut CheckState,
) -> Result<()> {
    if !page_id.is_valid() {
        return Err(IndexError::invariant("invalid child pointer".to_string()));
    }

    let kt = tree.key_type();
    let limits = tree.limits();
    let pin = tree.buffer_pool().pin_page(page_id)?;

    if pin.read().is_leaf() {
        let page = pin.read();
        let k = page.num_keys();
        if !is_root && k < limits.leaf_min {
            return Err(IndexError::invariant(format!(
                "leaf {} holds {} entries, below the minimum {}",
                page_id, k, limits.leaf_min
            )));
        }
        if k > limits.leaf_max {
            return Err(IndexError::invariant(format!(
                "leaf {} holds {} entries, above the maximum {}",
                page_id, k, limits.leaf_max
            )));
        }

        let mut prev_key: Option<Key> = None;
        for i in 0..k {
            let key = leaf::key_at(&page, &kt, i);
            check_bounds(page_id, &key, lower, upper)?;
            if let Some(prev) = &prev_key {
                if *prev >= key {
                    return Err(IndexError::invariant(format!(
                        "leaf {} keys are not strictly increasing at position {}",
                        page_id, i
                    )));
                }
            }
            prev_key = Some(key);
        }

        state.entries += k as u64;
        state.leaves.push(LeafLink {
            id: page_id,
            prev: leaf::prev(&page),
            next: leaf::next(&page),
        });
        return Ok(());
    }

    let children = {
        let page = pin.read();
        let k = page.num_keys();
        if !is_root && k < limits.branch_min {
            return Err(IndexError::invariant(format!(
                "branch {} holds {} keys, below the minimum {}",
                page_id, k, limits.branch_min
            )));
        }
        if k > limits.branch_max {
            return Err(IndexError::invariant(format!(
                "branch {} holds {} keys, above the maximum {}",
                page_id, k, limits.branch_max
            )));
        }
        if is_root && k == 0 {
            return Err(IndexError::invariant(format!(
                "root branch {} has no separator keys",
                page_id
            )));
        }

        let mut prev_key: Option<Key> = None;
        for i in 0..k {
            let key = branch::key_at(&page, &kt, i);
            check_bounds(page_id, &key, lower, upper)?;
            if let Some(prev) = &prev_key {
                if *prev >= key {
                    return Err(IndexError::invariant(format!(
                        "branch {} keys are not strictly increasing at position {}",
                        page_id, i
                    )));
                }
            }
            prev_key = Some(key);
        }

        // Subtree C[i] inherits [K[i-1], K[i])
        (0..=k)
            .map(|i| {
                let lo = if i == 0 {
                    lower.cloned()
                } else {
                    Some(branch::key_at(&page, &kt, i - 1))
                };
                let hi = if i == k {
                    upper.cloned()
                } else {
                    Some(branch::key_at(&page, &kt, i))
                };
                (branch::child_at(&page, i), lo, hi)
            })
            .collect::<Vec<_>>()
    };

    for (child, lo, hi) in children {
        visit(tree, child, lo.as_ref(), hi.as_ref(), false, state)?;
    }

    Ok(())
}

fn check_bounds(
    page_id: PageId,
    key: &Key,
    lower: Option<&Key>,
    upper: Option<&Key>,
) -> Result<()> {
    if let Some(lo) = lower {
        if key < lo {
            return Err(IndexError::invariant(format!(
                "page {} holds key {} below its lower bound {}",
                page_id, key, lo
            )));
        }
    }
    if let Some(hi) = upper {
        if key >= hi {
            return Err(IndexError::invariant(format!(
                "page {} holds key {} at or above its upper bound {}",
                page_id, key, hi
            )));
        }
    }
    Ok(())
}
