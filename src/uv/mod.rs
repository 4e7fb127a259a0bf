//! Texture space planning for cubes using the engine's box UV layout.
//!
//! Coordinates are integer texture pixels with the origin at the top-left
//! corner, `u` growing right and `v` growing down.

pub mod mapping;

use log::debug;

/// Corner of an unplaced box that should touch a suggested position.
///
/// Declaration order is the priority used when two suggestions are equally
/// far from the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UvCorner {
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
}

/// Free position next to an already placed box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suggestion {
    pub position: [i64; 2],
    pub corner: UvCorner,
}

impl Suggestion {
    pub fn new(position: [i64; 2], corner: UvCorner) -> Self {
        Self { position, corner }
    }

    /// Sort key: the larger coordinate first, which keeps layouts close to
    /// square, then corner priority.
    fn order_key(&self) -> (i64, UvCorner) {
        (self.position[0].max(self.position[1]), self.corner)
    }
}

/// `(min, max)` of one axis; a negative size extends towards smaller values.
fn true_bounds(position: i64, size: i64) -> (i64, i64) {
    if size < 0 {
        (position + size, position)
    } else {
        (position, position + size)
    }
}

/// Rectangle of texture space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UvBox {
    pub size: [i64; 2],
    pub uv: [i64; 2],
    pub is_mapped: bool,
}

impl UvBox {
    pub fn new(size: [i64; 2]) -> Self {
        Self {
            size,
            uv: [0, 0],
            is_mapped: false,
        }
    }

    /// A box whose position is already fixed.
    pub fn mapped(size: [i64; 2], uv: [i64; 2]) -> Self {
        Self {
            size,
            uv,
            is_mapped: true,
        }
    }

    pub fn bounds(&self) -> ((i64, i64), (i64, i64)) {
        (
            true_bounds(self.uv[0], self.size[0]),
            true_bounds(self.uv[1], self.size[1]),
        )
    }

    /// Strict overlap; boxes sharing an edge do not collide.
    pub fn collides(&self, other: &UvBox) -> bool {
        let (self_u, self_v) = self.bounds();
        let (other_u, other_v) = other.bounds();
        self_u.0 < other_u.1 && other_u.0 < self_u.1 && self_v.0 < other_v.1 && other_v.0 < self_v.1
    }

    /// Eight positions around the box, two per edge, clockwise from the top
    /// left.
    pub fn suggestions(&self) -> [Suggestion; 8] {
        let [u, v] = self.uv;
        let [su, sv] = [self.size[0] - 1, self.size[1] - 1];
        [
            Suggestion::new([u, v - 1], UvCorner::BottomLeft),
            Suggestion::new([u + su, v - 1], UvCorner::BottomRight),
            Suggestion::new([u + su + 1, v], UvCorner::TopLeft),
            Suggestion::new([u + su + 1, v + sv], UvCorner::BottomLeft),
            Suggestion::new([u + su, v + sv + 1], UvCorner::TopRight),
            Suggestion::new([u, v + sv + 1], UvCorner::TopLeft),
            Suggestion::new([u - 1, v + sv], UvCorner::BottomRight),
            Suggestion::new([u - 1, v], UvCorner::TopRight),
        ]
    }
}

/// Something the packer can place.
pub trait Packable {
    /// Outer size used for bounds checks and ordering.
    fn size(&self) -> [i64; 2];
    fn uv(&self) -> [i64; 2];
    fn set_uv(&mut self, uv: [i64; 2]);
    fn is_mapped(&self) -> bool;
    fn set_mapped(&mut self, mapped: bool);
    /// Rectangles actually occupied at the current position.
    fn colliders(&self) -> Vec<UvBox>;
    fn suggest_positions(&self) -> Vec<Suggestion>;

    /// Moves the item so its suggested corner touches the suggested position.
    fn apply_suggestion(&mut self, suggestion: &Suggestion) {
        let [su, sv] = self.size().map(|s| s - 1);
        let [u, v] = suggestion.position;
        self.set_uv(match suggestion.corner {
            UvCorner::TopLeft => [u, v],
            UvCorner::TopRight => [u - su, v],
            UvCorner::BottomLeft => [u, v - sv],
            UvCorner::BottomRight => [u - su, v - sv],
        });
    }
}

impl Packable for UvBox {
    fn size(&self) -> [i64; 2] {
        self.size
    }

    fn uv(&self) -> [i64; 2] {
        self.uv
    }

    fn set_uv(&mut self, uv: [i64; 2]) {
        self.uv = uv;
    }

    fn is_mapped(&self) -> bool {
        self.is_mapped
    }

    fn set_mapped(&mut self, mapped: bool) {
        self.is_mapped = mapped;
    }

    fn colliders(&self) -> Vec<UvBox> {
        vec![*self]
    }

    fn suggest_positions(&self) -> Vec<Suggestion> {
        self.suggestions().to_vec()
    }
}

/// Six faces of one cube in the standard box layout.
///
/// ```text
///         side5 side6
///   side1 side2 side3 side4
/// ```
///
/// `side6` has a negative height: it is painted upside down and occupies the
/// row above its anchor. The two top corners of the cross stay free for other
/// boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UvMcCube {
    pub width: i64,
    pub depth: i64,
    pub height: i64,
    uv: [i64; 2],
    is_mapped: bool,
}

impl UvMcCube {
    pub fn new(width: i64, depth: i64, height: i64) -> Self {
        Self {
            width,
            depth,
            height,
            uv: [0, 0],
            is_mapped: false,
        }
    }

    /// A cube whose layout is already placed at `uv`.
    pub fn mapped(width: i64, depth: i64, height: i64, uv: [i64; 2]) -> Self {
        Self {
            uv,
            is_mapped: true,
            ..Self::new(width, depth, height)
        }
    }

    /// Face boxes at the current position, `side1` first.
    pub fn sides(&self) -> [UvBox; 6] {
        let (w, d, h) = (self.width, self.depth, self.height);
        let [u, v] = self.uv;
        let face = |size: [i64; 2], offset: [i64; 2]| UvBox {
            size,
            uv: [u + offset[0], v + offset[1]],
            is_mapped: self.is_mapped,
        };
        [
            face([d, h], [0, d]),
            face([w, h], [d, d]),
            face([d, h], [d + w, d]),
            face([w, h], [2 * d + w, d]),
            face([w, d], [d, 0]),
            face([w, -d], [d + w, d]),
        ]
    }
}

impl Packable for UvMcCube {
    fn size(&self) -> [i64; 2] {
        [2 * self.depth + 2 * self.width, self.height + self.depth]
    }

    fn uv(&self) -> [i64; 2] {
        self.uv
    }

    fn set_uv(&mut self, uv: [i64; 2]) {
        self.uv = uv;
    }

    fn is_mapped(&self) -> bool {
        self.is_mapped
    }

    fn set_mapped(&mut self, mapped: bool) {
        self.is_mapped = mapped;
    }

    fn colliders(&self) -> Vec<UvBox> {
        self.sides().to_vec()
    }

    /// Twelve positions along the outline of the cross.
    fn suggest_positions(&self) -> Vec<Suggestion> {
        let [side1, _, _, side4, side5, side6] = self.sides();
        let pick = |side: UvBox, indices: [usize; 3]| {
            let all = side.suggestions();
            indices.map(|i| all[i])
        };
        [
            pick(side1, [0, 5, 6]),
            pick(side5, [0, 6, 7]),
            pick(side6, [1, 2, 3]),
            pick(side4, [1, 3, 4]),
        ]
        .concat()
    }
}

// ─── Packer ─────────────────────────────────────────────────────────────────

/// Places items on a texture without overlap.
///
/// Items are placed largest first. For each item every free suggestion is
/// tried and the one that grows the used area least wins, height first; the
/// first suggestion in order wins a tie. With `allow_expanding` the width is
/// widened to the widest item and height is unbounded. After a successful run
/// `height` holds the final texture height when it was unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UvPacker {
    pub width: u32,
    /// `None` leaves height unbounded.
    pub height: Option<u32>,
    pub allow_expanding: bool,
}

impl UvPacker {
    /// A height of `Some(0)` counts as unbounded.
    pub fn new(width: u32, height: Option<u32>, allow_expanding: bool) -> Self {
        Self {
            width,
            height: height.filter(|height| *height > 0),
            allow_expanding,
        }
    }

    /// Plans positions for every unmapped item.
    ///
    /// Mapped items keep their position and block the space they occupy.
    ///
    /// # Returns
    /// `false` when some item does not fit; that item is reset to `[0, 0]`
    /// and the items after it are left unmapped.
    pub fn plan<T: Packable>(&mut self, items: &mut [T]) -> bool {
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by(|&a, &b| items[b].size().cmp(&items[a].size()));

        if self.allow_expanding {
            let widest = items.iter().map(|item| item.size()[0]).max().unwrap_or(0);
            self.width = self.width.max(u32::try_from(widest).unwrap_or(u32::MAX));
        }
        self.height = self.height.filter(|height| *height > 0);
        let width = i64::from(self.width);
        let bound = if self.allow_expanding {
            None
        } else {
            self.height.map(i64::from)
        };
        let fits = |uv: [i64; 2], size: [i64; 2]| {
            uv[0] >= 0
                && uv[1] >= 0
                && uv[0] + size[0] <= width
                && bound.is_none_or(|height| uv[1] + size[1] <= height)
        };

        let mut colliders: Vec<UvBox> = Vec::new();
        let mut suggestions = vec![Suggestion::new([0, 0], UvCorner::TopLeft)];
        let mut used = [0_i64, 0];
        for item in items.iter().filter(|item| item.is_mapped()) {
            colliders.extend(item.colliders());
            for suggestion in item.suggest_positions() {
                if fits(suggestion.position, [0, 0]) {
                    insert_sorted(&mut suggestions, suggestion);
                }
            }
            used = extend_used(used, item.uv(), item.size());
        }

        for index in order {
            let item = &mut items[index];
            if item.is_mapped() {
                continue;
            }
            let mut best: Option<((i64, i64), usize, [i64; 2])> = None;
            for (position, suggestion) in suggestions.iter().enumerate() {
                item.apply_suggestion(suggestion);
                let (uv, size) = (item.uv(), item.size());
                if !fits(uv, size) {
                    continue;
                }
                let blocked = item
                    .colliders()
                    .iter()
                    .any(|side| colliders.iter().any(|other| side.collides(other)));
                if blocked {
                    continue;
                }
                let grown = extend_used(used, uv, size);
                let key = (grown[1], grown[0]);
                if best.is_none_or(|(best_key, _, _)| key < best_key) {
                    best = Some((key, position, uv));
                }
            }

            let Some((_, position, uv)) = best else {
                debug!("no free space for a {:?} box in a {}px wide texture", item.size(), self.width);
                item.set_uv([0, 0]);
                return false;
            };
            item.set_uv(uv);
            item.set_mapped(true);
            suggestions.remove(position);
            colliders.extend(item.colliders());
            for suggestion in item.suggest_positions() {
                if fits(suggestion.position, [0, 0]) {
                    insert_sorted(&mut suggestions, suggestion);
                }
            }
            used = extend_used(used, uv, item.size());
        }

        if self.allow_expanding || self.height.is_none() {
            let used_height = u32::try_from(used[1]).unwrap_or(u32::MAX);
            self.height = Some(self.height.unwrap_or(0).max(used_height));
        }
        true
    }
}

fn insert_sorted(suggestions: &mut Vec<Suggestion>, suggestion: Suggestion) {
    let key = suggestion.order_key();
    let at = suggestions.partition_point(|s| s.order_key() <= key);
    suggestions.insert(at, suggestion);
}

fn extend_used(used: [i64; 2], uv: [i64; 2], size: [i64; 2]) -> [i64; 2] {
    [used[0].max(uv[0] + size[0]), used[1].max(uv[1] + size[1])]
}

/// Plans cube layouts on a texture `width` pixels wide, optionally limited to
/// `height`. `None` or `Some(0)` computes the smallest height that fits.
///
/// # Returns
/// The planned texture size as `[width, height]`, or `None` when some cube
/// does not fit.
pub fn plan_uv(boxes: &mut [UvMcCube], width: u32, height: Option<u32>) -> Option<[u32; 2]> {
    let mut packer = UvPacker::new(width, height, false);
    if !packer.plan(boxes) {
        return None;
    }
    Some([packer.width, packer.height.unwrap_or(0)])
}
