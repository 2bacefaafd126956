//! Advisory UI hints carried in the schema.
//!
//! Hints never affect validation; clients use them to pick a widget, a
//! colour accent, a unit suffix and an icon.

use std::borrow::Cow;

use crate::protocol::{ReadBuffer, WireError, WriteBuffer};

/// Closed 12-colour palette; `0` on the wire means no colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Color {
    Slate = 1,
    Red = 2,
    Orange = 3,
    Amber = 4,
    Yellow = 5,
    Lime = 6,
    Green = 7,
    Teal = 8,
    Cyan = 9,
    Blue = 10,
    Violet = 11,
    Pink = 12,
}

impl Color {
    /// Convert from the 4-bit palette index
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Slate,
            2 => Self::Red,
            3 => Self::Orange,
            4 => Self::Amber,
            5 => Self::Yellow,
            6 => Self::Lime,
            7 => Self::Green,
            8 => Self::Teal,
            9 => Self::Cyan,
            10 => Self::Blue,
            11 => Self::Violet,
            12 => Self::Pink,
            _ => return None,
        })
    }

    /// Convert to the palette index
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Widget hint; the meaning of the byte depends on the value kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Widget(pub u8);

impl Widget {
    /// BOOL: toggle switch
    pub const TOGGLE: Self = Self(1);
    /// BOOL: checkbox
    pub const CHECKBOX: Self = Self(2);
    /// Numbers: slider
    pub const SLIDER: Self = Self(1);
    /// Numbers: spin box
    pub const SPINBOX: Self = Self(2);
    /// RGB: colour picker
    pub const PICKER: Self = Self(1);
    /// RGB: three channel sliders
    pub const SLIDERS: Self = Self(2);
    /// RGB: hex entry
    pub const HEX: Self = Self(3);
    /// Text: single line
    pub const LINE: Self = Self(1);
    /// Text: multi-line
    pub const TEXTAREA: Self = Self(2);
    /// Containers: inline row
    pub const INLINE: Self = Self(1);
    /// Containers: expanded list
    pub const LIST: Self = Self(2);
}

const HAS_WIDGET: u8 = 1 << 0;
const HAS_UNIT: u8 = 1 << 1;
const HAS_ICON: u8 = 1 << 2;

/// UI hints descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiHints {
    /// Accent colour
    pub color: Option<Color>,
    /// Unit suffix, e.g. `"%"` or `"ms"`
    pub unit: Option<Cow<'static, str>>,
    /// Icon glyph
    pub icon: Option<Cow<'static, str>>,
    /// Widget hint
    pub widget: Option<Widget>,
}

impl UiHints {
    /// No hints
    #[must_use]
    pub const fn new() -> Self {
        Self {
            color: None,
            unit: None,
            icon: None,
            widget: None,
        }
    }

    /// Set the accent colour
    #[must_use]
    pub fn color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    /// Set the unit suffix
    #[must_use]
    pub fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(Cow::Borrowed(unit));
        self
    }

    /// Set the icon glyph
    #[must_use]
    pub fn icon(mut self, icon: &'static str) -> Self {
        self.icon = Some(Cow::Borrowed(icon));
        self
    }

    /// Set the widget hint
    #[must_use]
    pub fn widget(mut self, widget: Widget) -> Self {
        self.widget = Some(widget);
        self
    }

    /// `true` when no hint is set
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.color.is_none() && self.unit.is_none() && self.icon.is_none() && self.widget.is_none()
    }

    /// Write the hints block
    pub fn encode(&self, out: &mut WriteBuffer<'_>) -> Result<(), WireError> {
        let mut flags = self.color.map_or(0, |c| c.as_u8() << 4);
        if self.widget.is_some() {
            flags |= HAS_WIDGET;
        }
        if self.unit.is_some() {
            flags |= HAS_UNIT;
        }
        if self.icon.is_some() {
            flags |= HAS_ICON;
        }
        out.write_u8(flags)?;
        if let Some(widget) = self.widget {
            out.write_u8(widget.0)?;
        }
        if let Some(unit) = &self.unit {
            out.write_ident(unit)?;
        }
        if let Some(icon) = &self.icon {
            out.write_ident(icon)?;
        }
        Ok(())
    }

    /// Read a hints block; strings are copied out of the frame
    pub fn decode(input: &mut ReadBuffer<'_>) -> Self {
        let flags = input.read_u8();
        let widget = (flags & HAS_WIDGET != 0).then(|| Widget(input.read_u8()));
        let unit = (flags & HAS_UNIT != 0).then(|| Cow::Owned(input.read_ident().to_owned()));
        let icon = (flags & HAS_ICON != 0).then(|| Cow::Owned(input.read_ident().to_owned()));
        Self {
            color: Color::from_u8(flags >> 4),
            unit,
            icon,
            widget,
        }
    }
}
