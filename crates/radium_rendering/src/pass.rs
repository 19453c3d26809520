//! Rendering pass indices.

use std::fmt;

/// Maximum number of passes a render technique can hold.
pub const MAX_PASSES: usize = 32;

/// Index of a logical rendering pass, always below [`MAX_PASSES`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassIndex(u8);

/// A set of [`PassIndex`]es.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PassSet(u32);

impl PassIndex {
    pub const LIGHTING_OPAQUE: Self = Self(0);
    pub const Z_PREPASS: Self = Self(1);
    pub const LIGHTING_TRANSPARENT: Self = Self(2);
    pub const LIGHTING_VOLUMETRIC: Self = Self(3);

    /// The pass configured when none is specified.
    pub const DEFAULT: Self = Self::LIGHTING_OPAQUE;

    /// Creates a pass index.
    ///
    /// # Panics
    /// If `index` is not below [`MAX_PASSES`].
    pub const fn new(index: usize) -> Self {
        assert!(index < MAX_PASSES, "Pass index out of range");
        Self(index as u8)
    }

    /// Creates a pass index, or returns [`None`] if `index` is not below
    /// [`MAX_PASSES`].
    pub const fn try_new(index: usize) -> Option<Self> {
        if index < MAX_PASSES {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// Every valid pass index in increasing order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..MAX_PASSES as u8).map(Self)
    }

    const fn bit(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Display for PassIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::LIGHTING_OPAQUE => f.write_str("opaque lighting"),
            Self::Z_PREPASS => f.write_str("Z-prepass"),
            Self::LIGHTING_TRANSPARENT => f.write_str("transparent lighting"),
            Self::LIGHTING_VOLUMETRIC => f.write_str("volumetric lighting"),
            Self(index) => write!(f, "pass {index}"),
        }
    }
}

impl PassSet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(u32::MAX);

    pub const fn contains(self, pass: PassIndex) -> bool {
        self.0 & pass.bit() != 0
    }

    pub fn insert(&mut self, pass: PassIndex) {
        self.0 |= pass.bit();
    }

    pub fn remove(&mut self, pass: PassIndex) {
        self.0 &= !pass.bit();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// The highest pass in the set.
    pub fn last(self) -> Option<PassIndex> {
        (!self.is_empty()).then(|| PassIndex((31 - self.0.leading_zeros()) as u8))
    }

    /// The passes in the set in increasing order.
    pub fn iter(self) -> impl Iterator<Item = PassIndex> {
        PassIndex::all().filter(move |&pass| self.contains(pass))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl FromIterator<PassIndex> for PassSet {
    fn from_iter<T: IntoIterator<Item = PassIndex>>(iter: T) -> Self {
        let mut set = Self::EMPTY;
        for pass in iter {
            set.insert(pass);
        }
        set
    }
}

impl fmt::Debug for PassSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(PassIndex::get)).finish()
    }
}
