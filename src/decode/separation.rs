use crate::format::display_format::SEPARATION_COMPONENTS;

/// One registered ink and its 16-bit CMYK equivalent.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Separation {
    /// Ink name as reported by the interpreter (`Cyan`, `PANTONE 186 C`, ...).
    pub name: String,
    /// Cyan equivalent, 0..=65535.
    pub c: u16,
    /// Magenta equivalent, 0..=65535.
    pub m: u16,
    /// Yellow equivalent, 0..=65535.
    pub y: u16,
    /// Black equivalent, 0..=65535.
    pub k: u16,
}

impl Separation {
    /// Build an entry.
    pub fn new(name: impl Into<String>, c: u16, m: u16, y: u16, k: u16) -> Self {
        Self {
            name: name.into(),
            c,
            m,
            y,
            k,
        }
    }

    pub(crate) fn cmyk(&self) -> [u16; 4] {
        [self.c, self.m, self.y, self.k]
    }
}

const PROCESS_INKS: [[u16; 4]; 4] = [
    [u16::MAX, 0, 0, 0],
    [0, u16::MAX, 0, 0],
    [0, 0, u16::MAX, 0],
    [0, 0, 0, u16::MAX],
];

/// Inks registered during one render, indexed by pixel component.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SeparationTable {
    entries: [Option<Separation>; SEPARATION_COMPONENTS],
}

impl SeparationTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the ink for component `index`.
    ///
    /// Returns `false` when the index is beyond what a pixel can carry; such inks are dropped.
    pub fn register(&mut self, index: usize, separation: Separation) -> bool {
        match self.entries.get_mut(index) {
            Some(slot) => {
                *slot = Some(separation);
                true
            }
            None => false,
        }
    }

    /// Ink for component `index`, if registered.
    pub fn get(&self, index: usize) -> Option<&Separation> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    /// Number of registered inks.
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    /// `true` when nothing was registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered inks with their component index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Separation)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }

    /// CMYK equivalent used for component `index` when decoding.
    ///
    /// Unregistered process components (0..4) fall back to pure C, M, Y and K; unregistered spot
    /// components contribute nothing.
    pub(crate) fn ink_for(&self, index: usize) -> Option<[u16; 4]> {
        match self.get(index) {
            Some(sep) => Some(sep.cmyk()),
            None => PROCESS_INKS.get(index).copied(),
        }
    }
}

/// Per-render set of visible ink channels. Defaults to all visible.
///
/// Visibility only changes how a captured page is decoded; it never requires a re-render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ChannelVisibility(u8);

impl Default for ChannelVisibility {
    fn default() -> Self {
        Self::all()
    }
}

impl ChannelVisibility {
    /// Every channel visible.
    pub fn all() -> Self {
        Self(u8::MAX)
    }

    /// No channel visible.
    pub fn none() -> Self {
        Self(0)
    }

    /// Only `index` visible.
    pub fn solo(index: usize) -> Self {
        Self::none().with(index, true)
    }

    /// Copy with channel `index` set to `visible`. Indexes past the last channel are ignored.
    pub fn with(mut self, index: usize, visible: bool) -> Self {
        self.set(index, visible);
        self
    }

    /// Set channel `index` to `visible`.
    pub fn set(&mut self, index: usize, visible: bool) {
        if index >= SEPARATION_COMPONENTS {
            return;
        }
        if visible {
            self.0 |= 1 << index;
        } else {
            self.0 &= !(1 << index);
        }
    }

    /// `true` when channel `index` is visible.
    pub fn is_visible(self, index: usize) -> bool {
        index < SEPARATION_COMPONENTS && self.0 & (1 << index) != 0
    }

    /// The single visible channel among the first `channels`, if exactly one is visible.
    pub fn only_visible(self, channels: usize) -> Option<usize> {
        let mut found = None;
        for i in 0..channels.min(SEPARATION_COMPONENTS) {
            if self.is_visible(i) {
                if found.is_some() {
                    return None;
                }
                found = Some(i);
            }
        }
        found
    }
}

/// Caller-supplied decode options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DecodeOptions {
    /// Which ink channels contribute.
    pub visibility: ChannelVisibility,
    /// When exactly one channel is visible, show it as black-on-white gray.
    pub gray_solo: bool,
}

#[cfg(test)]
#[path = "../../tests/unit/decode/separation.rs"]
mod tests;
