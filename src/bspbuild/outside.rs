//! Outside filling and leak detection.
//!
//! The void floods inward through the portal graph. Sky leaves are not
//! walls to the flood: it passes through them, but every leaf reached
//! that way is tagged as sky-entered, because a connection to the void
//! that crosses a sky portal is the map working as intended, not a
//! leak. Only a path made entirely of non-sky portals that reaches a
//! leaf holding an entity is a leak, and the portal chain back out
//! becomes the `.pts` pointfile. Empty leaves the void reaches cleanly
//! are void pockets and turn solid; sky-entered interiors stay open.

use std::path::Path;

use glam::DVec3;

use bsp::Contents;

use super::{
    portals::PortalGraph,
    tree::{Tree, TreeNodeKind},
};

#[derive(Debug, Default)]
pub struct FillResult {
    pub leaked: bool,
    /// Portal-center polyline from an inside entity out to the void.
    pub leak_path: Vec<DVec3>,
    pub filled_leaves: usize,
}

/// How a leaf was reached from the void. `Clean` means every portal on
/// the way was sky-free, which is the only kind of path that counts as
/// a leak; the states form a lattice and a leaf can upgrade once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Reach {
    No,
    ViaSky,
    Clean,
}

/// Floods from the outside sentinel. `entity_spots` are (classname,
/// origin) pairs of point entities that must stay sealed in.
pub fn fill_outside(
    tree: &mut Tree,
    graph: &PortalGraph,
    planes: &crate::planes::PlaneRegistry,
    entity_spots: &[(String, DVec3)],
) -> FillResult {
    let node_count = tree.nodes.len() + 1; // plus the outside sentinel

    // leaves that hold an entity, with the entity that claimed them
    let mut entity_leaf = spots::IndexedSpots::default();
    for (classname, origin) in entity_spots {
        let leaf = tree.leaf_at(planes, *origin);
        match tree.nodes[leaf as usize].contents() {
            Some(Contents::Solid) => {
                log::warn!(
                    "Entity {} @ ({:.0} {:.0} {:.0}) is inside solid",
                    classname,
                    origin.x,
                    origin.y,
                    origin.z
                );
            }
            _ => entity_leaf.push(leaf, classname.clone(), *origin),
        }
    }

    // breadth-first from the void; a node re-queues when a sky-free
    // path later improves on a sky-crossing one
    let mut reach = vec![Reach::No; node_count];
    let mut entered_by: Vec<Option<usize>> = vec![None; node_count];
    let mut queue = std::collections::VecDeque::new();

    reach[graph.outside as usize] = Reach::Clean;
    queue.push_back(graph.outside);

    let mut reached_entity: Option<(u32, String, DVec3)> = None;

    'flood: while let Some(node) = queue.pop_front() {
        let node_reach = reach[node as usize];

        for &portal_id in &graph.leaf_portals[node as usize] {
            let portal = &graph.portals[portal_id];
            let neighbor = graph.other_side(portal, node);

            let contents = tree.nodes[neighbor as usize]
                .contents()
                .expect("internal error: portal into a non-leaf (please file an issue)");
            if contents == Contents::Solid {
                continue;
            }

            // crossing into or out of sky taints the whole path
            let neighbor_reach = if contents == Contents::Sky || node_reach == Reach::ViaSky {
                Reach::ViaSky
            } else {
                Reach::Clean
            };
            if neighbor_reach <= reach[neighbor as usize] {
                continue;
            }

            reach[neighbor as usize] = neighbor_reach;
            entered_by[neighbor as usize] = Some(portal_id);

            if neighbor_reach == Reach::Clean {
                if let Some((classname, origin)) = entity_leaf.get(neighbor) {
                    reached_entity = Some((neighbor, classname.clone(), origin));
                    break 'flood;
                }
            }

            queue.push_back(neighbor);
        }
    }

    if let Some((leaf, classname, origin)) = reached_entity {
        // walk the portal chain back out to the void
        let mut path = vec![origin];
        let mut at = leaf;
        while at != graph.outside {
            let portal_id = entered_by[at as usize]
                .expect("internal error: broken leak chain (please file an issue)");
            let portal = &graph.portals[portal_id];
            path.push(portal.winding.center());
            at = graph.other_side(portal, at);
        }

        log::error!(
            "LEAK: reached {} @ ({:.0} {:.0} {:.0}) from the void",
            classname,
            origin.x,
            origin.y,
            origin.z
        );

        return FillResult {
            leaked: true,
            leak_path: path,
            filled_leaves: 0,
        };
    }

    // no leak: empty leaves the void reached without crossing sky are
    // void pockets; sky-entered space stays part of the map
    let mut filled = 0usize;
    for (index, node) in tree.nodes.iter_mut().enumerate() {
        if reach[index] != Reach::Clean {
            continue;
        }
        if let TreeNodeKind::Leaf { contents, marks } = &mut node.kind {
            if *contents == Contents::Empty {
                *contents = Contents::Solid;
                marks.clear();
                filled += 1;
            }
        }
    }

    FillResult {
        leaked: false,
        leak_path: Vec::new(),
        filled_leaves: filled,
    }
}

/// Writes `<map>.pts` (and the older `.lin` flavor) for the leak path.
pub fn write_pointfiles(map_path: &Path, path: &[DVec3]) -> std::io::Result<()> {
    let mut pts = String::new();
    for p in path {
        pts += &format!("{} {} {}\n", p.x, p.y, p.z);
    }
    std::fs::write(map_path.with_extension("pts"), &pts)?;

    let mut lin = String::new();
    for pair in path.windows(2) {
        lin += &format!(
            "{} {} {} - {} {} {}\n",
            pair[0].x, pair[0].y, pair[0].z, pair[1].x, pair[1].y, pair[1].z
        );
    }
    std::fs::write(map_path.with_extension("lin"), &lin)
}

mod spots {
    use glam::DVec3;

    /// Leaf -> entity bookkeeping for the leak check.
    #[derive(Default)]
    pub struct IndexedSpots {
        entries: Vec<(u32, String, DVec3)>,
    }

    impl IndexedSpots {
        pub fn push(&mut self, leaf: u32, classname: String, origin: DVec3) {
            self.entries.push((leaf, classname, origin));
        }

        pub fn get(&self, leaf: u32) -> Option<(&String, DVec3)> {
            self.entries
                .iter()
                .find(|(l, _, _)| *l == leaf)
                .map(|(_, c, o)| (c, *o))
        }
    }
}
