//! Per-output set of logical updates waiting for the next vsync.

use bitflags::bitflags;

use crate::layer::OsdOutput;

/// Logical layer updates, in drain order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpdateKind {
    ColorMode,
    Enable,
    ColorKey,
    ColorKeyEnable,
    GlobalAlpha,
    Order,
    ScaleCoef,
    Geometry,
    ScaleEnable,
    FreescaleEnable,
    Reverse,
    Rotate,
    Fifo,
}

impl UpdateKind {
    pub const ALL: [UpdateKind; 13] = [
        UpdateKind::ColorMode,
        UpdateKind::Enable,
        UpdateKind::ColorKey,
        UpdateKind::ColorKeyEnable,
        UpdateKind::GlobalAlpha,
        UpdateKind::Order,
        UpdateKind::ScaleCoef,
        UpdateKind::Geometry,
        UpdateKind::ScaleEnable,
        UpdateKind::FreescaleEnable,
        UpdateKind::Reverse,
        UpdateKind::Rotate,
        UpdateKind::Fifo,
    ];

    pub fn bit(self) -> PendingUpdateSet {
        PendingUpdateSet::from_bits_retain(1 << self as u32)
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct PendingUpdateSet: u32 {
        const COLOR_MODE = 1 << 0;
        const ENABLE = 1 << 1;
        const COLOR_KEY = 1 << 2;
        const COLOR_KEY_ENABLE = 1 << 3;
        const GLOBAL_ALPHA = 1 << 4;
        const ORDER = 1 << 5;
        const SCALE_COEF = 1 << 6;
        const GEOMETRY = 1 << 7;
        const SCALE_ENABLE = 1 << 8;
        const FREESCALE_ENABLE = 1 << 9;
        const REVERSE = 1 << 10;
        const ROTATE = 1 << 11;
        const FIFO = 1 << 12;
    }
}

impl PendingUpdateSet {
    /// Kinds in the set, ascending.
    pub fn kinds(self) -> impl Iterator<Item = UpdateKind> {
        UpdateKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(kind.bit()))
    }
}

#[derive(Debug, Default)]
pub struct UpdateList {
    pending: [PendingUpdateSet; OsdOutput::COUNT],
}

impl UpdateList {
    pub fn add(&mut self, output: OsdOutput, kind: UpdateKind) {
        self.pending[output.index()] |= kind.bit();
    }

    pub fn pending(&self, output: OsdOutput) -> PendingUpdateSet {
        self.pending[output.index()]
    }

    /// Empties the set for `output`, returning what was pending.
    pub fn take(&mut self, output: OsdOutput) -> PendingUpdateSet {
        std::mem::take(&mut self.pending[output.index()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_follow_declaration_order() {
        assert_eq!(UpdateKind::ColorMode.bit(), PendingUpdateSet::COLOR_MODE);
        assert_eq!(UpdateKind::Geometry.bit(), PendingUpdateSet::GEOMETRY);
        assert_eq!(UpdateKind::Fifo.bit(), PendingUpdateSet::FIFO);
        let all = UpdateKind::ALL
            .iter()
            .fold(PendingUpdateSet::empty(), |acc, k| acc | k.bit());
        assert_eq!(all, PendingUpdateSet::all());
    }

    #[test]
    fn kinds_iterate_ascending() {
        let set = PendingUpdateSet::FIFO | PendingUpdateSet::COLOR_MODE | PendingUpdateSet::GEOMETRY;
        let kinds: Vec<_> = set.kinds().collect();
        assert_eq!(
            kinds,
            vec![UpdateKind::ColorMode, UpdateKind::Geometry, UpdateKind::Fifo]
        );
    }

    #[test]
    fn add_is_idempotent_and_take_clears() {
        let mut list = UpdateList::default();
        list.add(OsdOutput::Osd2, UpdateKind::Enable);
        list.add(OsdOutput::Osd2, UpdateKind::Enable);
        assert_eq!(list.pending(OsdOutput::Osd2), PendingUpdateSet::ENABLE);
        assert!(list.pending(OsdOutput::Osd1).is_empty());

        assert_eq!(list.take(OsdOutput::Osd2), PendingUpdateSet::ENABLE);
        assert!(list.pending(OsdOutput::Osd2).is_empty());
    }
}
