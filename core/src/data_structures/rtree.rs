//! Static R-tree over interval boxes
//!
//! Built in one pass with Sort-Tile-Recursive packing: entries are sorted
//! by centre along the first dimension, cut into vertical slabs, each slab
//! recursively tiled along the next dimension, and the final runs packed
//! into leaves of [`NODE_CAPACITY`] entries. Upper levels are packed the
//! same way over child bounding boxes. The tree stores slot numbers; the
//! owning index maps them back to entries.

use crate::geometry::IntervalBox;

/// Maximum fan-out of every node
pub(crate) const NODE_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
enum RTreeNode {
    Leaf {
        bbox: IntervalBox,
        entries: Vec<(usize, IntervalBox)>,
    },
    Internal {
        bbox: IntervalBox,
        children: Vec<RTreeNode>,
    },
}

impl RTreeNode {
    fn bbox(&self) -> &IntervalBox {
        match self {
            RTreeNode::Leaf { bbox, .. } | RTreeNode::Internal { bbox, .. } => bbox,
        }
    }

    fn leaf(entries: Vec<(usize, IntervalBox)>) -> Option<Self> {
        let bbox = enclosing(entries.iter().map(|(_, b)| b))?;
        Some(RTreeNode::Leaf { bbox, entries })
    }

    fn internal(children: Vec<RTreeNode>) -> Option<Self> {
        let bbox = enclosing(children.iter().map(RTreeNode::bbox))?;
        Some(RTreeNode::Internal { bbox, children })
    }

    fn validate(&self) -> bool {
        match self {
            RTreeNode::Leaf { bbox, entries } => {
                entries.iter().all(|(_, b)| bbox.contains_within(b, 0.0))
            }
            RTreeNode::Internal { bbox, children } => children
                .iter()
                .all(|child| bbox.contains_within(child.bbox(), 0.0) && child.validate()),
        }
    }
}

fn enclosing<'a>(mut boxes: impl Iterator<Item = &'a IntervalBox>) -> Option<IntervalBox> {
    let first = boxes.next()?.clone();
    Some(boxes.fold(first, |acc, b| acc.merge(b)))
}

/// Sort-Tile-Recursive grouping into runs of at most [`NODE_CAPACITY`]
fn str_tiles<T, F>(mut items: Vec<T>, dims: usize, dim: usize, center: &F) -> Vec<Vec<T>>
where
    F: Fn(&T, usize) -> f64,
{
    if items.is_empty() {
        return Vec::new();
    }
    items.sort_by(|a, b| center(a, dim).total_cmp(&center(b, dim)));

    let n = items.len();
    if n <= NODE_CAPACITY {
        return vec![items];
    }
    if dim + 1 >= dims {
        return split_runs(items, NODE_CAPACITY);
    }

    let pages = n.div_ceil(NODE_CAPACITY);
    let slabs = ((pages as f64).powf(1.0 / (dims - dim) as f64).ceil() as usize).max(1);
    let slab_size = n.div_ceil(slabs);

    split_runs(items, slab_size)
        .into_iter()
        .flat_map(|slab| str_tiles(slab, dims, dim + 1, center))
        .collect()
}

fn split_runs<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut runs = Vec::with_capacity(items.len().div_ceil(size.max(1)));
    let mut iter = items.into_iter();
    loop {
        let run: Vec<T> = iter.by_ref().take(size.max(1)).collect();
        if run.is_empty() {
            break;
        }
        runs.push(run);
    }
    runs
}

/// Bulk-loaded R-tree of slot numbers
#[derive(Debug, Clone, Default)]
pub(crate) struct RTree {
    root: Option<RTreeNode>,
    len: usize,
}

impl RTree {
    pub(crate) fn bulk_load(items: Vec<(usize, IntervalBox)>) -> Self {
        let len = items.len();
        let Some(dims) = items.first().map(|(_, b)| b.dimensions()) else {
            return Self::default();
        };

        let mut level: Vec<RTreeNode> = str_tiles(items, dims, 0, &|(_, b): &(usize, IntervalBox), d| {
            b.center(d)
        })
        .into_iter()
        .filter_map(RTreeNode::leaf)
        .collect();

        while level.len() > 1 {
            level = str_tiles(level, dims, 0, &|node: &RTreeNode, d| node.bbox().center(d))
                .into_iter()
                .filter_map(RTreeNode::internal)
                .collect();
        }

        Self {
            root: level.pop(),
            len,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Appends the slots whose box touches `window` (closed intersection)
    pub(crate) fn query(&self, window: &IntervalBox, out: &mut Vec<usize>) {
        let Some(root) = &self.root else {
            return;
        };
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if !node.bbox().touches(window) {
                continue;
            }
            match node {
                RTreeNode::Leaf { entries, .. } => out.extend(
                    entries
                        .iter()
                        .filter(|(_, b)| b.touches(window))
                        .map(|(slot, _)| *slot),
                ),
                RTreeNode::Internal { children, .. } => stack.extend(children.iter()),
            }
        }
    }

    /// Every node's box encloses its children
    pub(crate) fn validate(&self) -> bool {
        self.root.as_ref().map_or(true, RTreeNode::validate)
    }

    pub(crate) fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = self.root.as_ref();
        while let Some(current) = node {
            depth += 1;
            node = match current {
                RTreeNode::Leaf { .. } => None,
                RTreeNode::Internal { children, .. } => children.first(),
            };
        }
        depth
    }
}
