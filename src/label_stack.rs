//! Ranked per-voxel label stacks and the label catalogue
//!
//! Each voxel stores `nbest` slots of (probability, label), kept in
//! non-increasing probability order. A slot pairs its probability with its
//! label so both always move together when re-sorting.

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::utils::alloc::try_filled;

/// Compact internal label index (`0..nobj`)
pub type LabelId = u16;

/// Largest number of slots a stack may hold per voxel
pub const MAX_NBEST: usize = u8::MAX as usize;

/// One (probability, label) entry of a voxel's stack
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub proba: f64,
    /// `None` marks an unset slot
    pub label: Option<LabelId>,
}

impl Slot {
    pub const EMPTY: Slot = Slot { proba: 0.0, label: None };

    pub fn new(proba: f64, label: LabelId) -> Self {
        Slot { proba, label: Some(label) }
    }
}

/// Mapping from compact label index to external label value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelCatalogue {
    values: Vec<i32>,
}

impl LabelCatalogue {
    pub fn new(values: Vec<i32>) -> Result<Self> {
        if values.len() > LabelId::MAX as usize + 1 {
            return Err(Error::config(format!(
                "at most {} labels are supported, got {}", LabelId::MAX as usize + 1, values.len()
            )));
        }
        for (i, v) in values.iter().enumerate() {
            if values[..i].contains(v) {
                return Err(Error::config(format!("label value {} appears twice", v)));
            }
        }
        Ok(LabelCatalogue { values })
    }

    /// Number of labels (`nobj`)
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// External value of label `id`
    #[inline]
    pub fn value(&self, id: LabelId) -> Option<i32> {
        self.values.get(id as usize).copied()
    }

    pub fn index_of(&self, value: i32) -> Option<LabelId> {
        self.values.iter().position(|&v| v == value).map(|p| p as LabelId)
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    /// Register `value` if unseen and return its index
    fn intern(&mut self, value: i32) -> Result<LabelId> {
        if let Some(id) = self.index_of(value) {
            return Ok(id);
        }
        if self.values.len() > LabelId::MAX as usize {
            return Err(Error::config("too many distinct labels in segmentation"));
        }
        self.values.push(value);
        Ok((self.values.len() - 1) as LabelId)
    }
}

/// Per-voxel ranked (probability, label) stacks, voxel-major
#[derive(Debug, Clone, PartialEq)]
pub struct LabelStack {
    nbest: usize,
    n_voxels: usize,
    slots: Vec<Slot>,
}

impl LabelStack {
    /// Stack of `n_voxels` voxels with every slot unset
    pub fn new(n_voxels: usize, nbest: usize) -> Result<Self> {
        check_nbest(nbest)?;
        let len = n_voxels.checked_mul(nbest)
            .ok_or_else(|| Error::config("label stack size overflows"))?;
        let slots = try_filled("label stack", len, Slot::EMPTY)?;
        Ok(LabelStack { nbest, n_voxels, slots })
    }

    /// Build from slot-major parallel arrays `probas[m][xyz]`, `labels[m][xyz]`
    ///
    /// Each voxel is re-sorted so the stack starts out ranked.
    pub fn from_parallel(probas: &[Vec<f64>], labels: &[Vec<Option<LabelId>>]) -> Result<Self> {
        let nbest = probas.len();
        check_nbest(nbest)?;
        if labels.len() != nbest {
            return Err(Error::config(format!(
                "{} probability arrays but {} label arrays", nbest, labels.len()
            )));
        }
        let n_voxels = probas[0].len();
        for m in 0..nbest {
            if probas[m].len() != n_voxels || labels[m].len() != n_voxels {
                return Err(Error::config(format!(
                    "slot {} arrays have {} / {} voxels, expected {}",
                    m, probas[m].len(), labels[m].len(), n_voxels
                )));
            }
        }

        let mut stack = LabelStack::new(n_voxels, nbest)?;
        for xyz in 0..n_voxels {
            let voxel = stack.voxel_mut(xyz);
            for m in 0..nbest {
                voxel[m] = Slot { proba: probas[m][xyz], label: labels[m][xyz] };
            }
        }
        stack.sort_all();
        Ok(stack)
    }

    /// Hard initialisation from a discrete segmentation
    ///
    /// Label values are catalogued in first-seen order over the masked
    /// voxels; each masked voxel gets its label in slot 0 with probability 1.
    /// Unmasked voxels stay unset.
    pub fn from_segmentation(
        seg: &[i32],
        mask: &[bool],
        nbest: usize,
    ) -> Result<(LabelStack, LabelCatalogue)> {
        if seg.len() != mask.len() {
            return Err(Error::config(format!(
                "segmentation has {} voxels, mask has {}", seg.len(), mask.len()
            )));
        }
        let mut stack = LabelStack::new(seg.len(), nbest)?;
        let mut catalogue = LabelCatalogue::default();
        for (xyz, (&value, &inside)) in seg.iter().zip(mask.iter()).enumerate() {
            if inside {
                let id = catalogue.intern(value)?;
                stack.voxel_mut(xyz)[0] = Slot::new(1.0, id);
            }
        }
        Ok((stack, catalogue))
    }

    #[inline]
    pub fn nbest(&self) -> usize {
        self.nbest
    }

    #[inline]
    pub fn n_voxels(&self) -> usize {
        self.n_voxels
    }

    #[inline]
    pub fn voxel(&self, xyz: usize) -> &[Slot] {
        &self.slots[xyz * self.nbest..(xyz + 1) * self.nbest]
    }

    #[inline]
    pub fn voxel_mut(&mut self, xyz: usize) -> &mut [Slot] {
        &mut self.slots[xyz * self.nbest..(xyz + 1) * self.nbest]
    }

    /// All slots, voxel-major (`nbest` consecutive slots per voxel)
    #[inline]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    #[inline]
    pub(crate) fn slots_mut(&mut self) -> &mut [Slot] {
        &mut self.slots
    }

    /// Slot index of `label` at `xyz`, if present
    #[inline]
    pub fn depth_of(&self, xyz: usize, label: LabelId) -> Option<usize> {
        self.voxel(xyz).iter().position(|s| s.label == Some(label))
    }

    /// Probability of the top-ranked slot
    #[inline]
    pub fn top(&self, xyz: usize) -> Slot {
        self.voxel(xyz)[0]
    }

    /// Probability of the second-ranked slot, 0 when `nbest == 1`
    #[inline]
    pub fn second_proba(&self, xyz: usize) -> f64 {
        if self.nbest > 1 { self.voxel(xyz)[1].proba } else { 0.0 }
    }

    /// Probability of the lowest stored slot
    #[inline]
    pub fn last_proba(&self, xyz: usize) -> f64 {
        self.voxel(xyz)[self.nbest - 1].proba
    }

    /// Largest label index referenced anywhere in the stack
    pub fn max_label(&self) -> Option<LabelId> {
        self.slots.iter().filter_map(|s| s.label).max()
    }

    /// Keep only the `nbest` highest-ranked slots of every voxel
    pub fn truncate(&mut self, nbest: usize) -> Result<()> {
        check_nbest(nbest)?;
        if nbest >= self.nbest {
            return Ok(());
        }
        let old = self.nbest;
        let mut slots = try_filled("label stack", self.n_voxels * nbest, Slot::EMPTY)?;
        for (dst, src) in slots.chunks_mut(nbest).zip(self.slots.chunks(old)) {
            dst.copy_from_slice(&src[..nbest]);
        }
        self.slots = slots;
        self.nbest = nbest;
        Ok(())
    }

    /// Re-sort one voxel; returns true if its top label changed
    pub fn sort_voxel(&mut self, xyz: usize) -> bool {
        sort_slots(self.voxel_mut(xyz))
    }

    /// Re-sort every voxel; returns the number of voxels whose top label changed
    pub fn sort_all(&mut self) -> usize {
        self.slots
            .par_chunks_mut(self.nbest)
            .map(|voxel| sort_slots(voxel) as usize)
            .sum()
    }

    /// Re-sort voxels where `mask` is set; returns the number of relabelled voxels
    pub fn sort_masked(&mut self, mask: &[bool]) -> usize {
        debug_assert_eq!(mask.len(), self.n_voxels);
        self.slots
            .par_chunks_mut(self.nbest)
            .zip(mask.par_iter())
            .map(|(voxel, &inside)| if inside { sort_slots(voxel) as usize } else { 0 })
            .sum()
    }

    #[inline]
    pub fn is_sorted(&self, xyz: usize) -> bool {
        self.voxel(xyz).windows(2).all(|w| w[0].proba >= w[1].proba)
    }

    /// Slot-major probability arrays `[m][xyz]`
    pub fn probabilities(&self) -> Vec<Vec<f64>> {
        (0..self.nbest)
            .map(|m| self.slots.chunks(self.nbest).map(|v| v[m].proba).collect())
            .collect()
    }

    /// Slot-major label arrays `[m][xyz]`
    pub fn labels(&self) -> Vec<Vec<Option<LabelId>>> {
        (0..self.nbest)
            .map(|m| self.slots.chunks(self.nbest).map(|v| v[m].label).collect())
            .collect()
    }

    /// Top-ranked label of every voxel mapped to its external value
    /// (`background` where unset)
    pub fn segmentation(&self, catalogue: &LabelCatalogue, background: i32) -> Vec<i32> {
        self.slots
            .chunks(self.nbest)
            .map(|v| v[0].label.and_then(|l| catalogue.value(l)).unwrap_or(background))
            .collect()
    }
}

fn check_nbest(nbest: usize) -> Result<()> {
    if nbest == 0 || nbest > MAX_NBEST {
        return Err(Error::config(format!(
            "nbest must be in 1..={}, got {}", MAX_NBEST, nbest
        )));
    }
    Ok(())
}

/// Stable descending sort of a voxel's slots; true if the top label changed
#[inline]
fn sort_slots(voxel: &mut [Slot]) -> bool {
    let top = voxel[0].label;
    // insertion sort: nbest is small and already nearly ordered
    for i in 1..voxel.len() {
        let cur = voxel[i];
        let mut j = i;
        while j > 0 && voxel[j - 1].proba < cur.proba {
            voxel[j] = voxel[j - 1];
            j -= 1;
        }
        voxel[j] = cur;
    }
    voxel[0].label != top
}
