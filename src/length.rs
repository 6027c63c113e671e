use crate::types::Pt;

/// A length as written in markup, resolved late against the layout context.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Length {
    #[default]
    Auto,
    Px(Pt),
    /// Fraction of the reference length, `0.5` for `50%`.
    Percent(f32),
    Em(f32),
    /// Multiple of the line spacing (ascent, descent and gap).
    LineHeight(f32),
    /// Multiple of the glyph height alone (ascent and descent).
    TrueLineHeight(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthContext {
    pub reference: Pt,
    pub font_size: Pt,
    pub line_height: Pt,
    pub true_line_height: Pt,
}

impl LengthContext {
    pub fn new(reference: Pt, font_size: Pt, line_height: Pt, true_line_height: Pt) -> Self {
        Self {
            reference,
            font_size,
            line_height,
            true_line_height,
        }
    }

    pub fn with_reference(mut self, reference: Pt) -> Self {
        self.reference = reference;
        self
    }
}

impl Length {
    pub fn px(value: f32) -> Self {
        Length::Px(Pt::from_f32(value))
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Length::Auto)
    }

    pub fn is_relative(&self) -> bool {
        matches!(self, Length::Percent(_))
    }

    /// `Auto` resolves to zero; callers that treat auto specially check first.
    pub fn resolve(self, ctx: &LengthContext) -> Pt {
        match self {
            Length::Auto => Pt::ZERO,
            Length::Px(value) => value,
            Length::Percent(value) => ctx.reference * value,
            Length::Em(value) => ctx.font_size * value,
            Length::LineHeight(value) => ctx.line_height * value,
            Length::TrueLineHeight(value) => ctx.true_line_height * value,
        }
    }

    pub fn resolve_or(self, ctx: &LengthContext, fallback: Pt) -> Pt {
        if self.is_auto() {
            fallback
        } else {
            self.resolve(ctx)
        }
    }

    /// Parses `12`, `12px`, `50%`, `1.5em`, `2lh`, `1tlh` and `auto`.
    pub fn parse(raw: &str) -> Option<Length> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.eq_ignore_ascii_case("auto") {
            return Some(Length::Auto);
        }
        let lower = raw.to_ascii_lowercase();
        let (number, unit) = split_unit(&lower);
        let value: f32 = number.parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        match unit {
            "" | "px" => Some(Length::px(value)),
            "%" => Some(Length::Percent(value / 100.0)),
            "em" => Some(Length::Em(value)),
            "lh" => Some(Length::LineHeight(value)),
            "tlh" => Some(Length::TrueLineHeight(value)),
            _ => None,
        }
    }
}

fn split_unit(raw: &str) -> (&str, &str) {
    let split = raw
        .char_indices()
        .find(|(_, ch)| !(ch.is_ascii_digit() || *ch == '.' || *ch == '-' || *ch == '+'))
        .map(|(idx, _)| idx)
        .unwrap_or(raw.len());
    (&raw[..split], raw[split..].trim())
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Padding {
    pub top: Length,
    pub right: Length,
    pub bottom: Length,
    pub left: Length,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Edges {
    pub top: Pt,
    pub right: Pt,
    pub bottom: Pt,
    pub left: Pt,
}

impl Edges {
    pub fn horizontal(&self) -> Pt {
        self.left + self.right
    }

    pub fn vertical(&self) -> Pt {
        self.top + self.bottom
    }
}

impl Padding {
    pub fn zero() -> Self {
        Self::all(Length::Px(Pt::ZERO))
    }

    pub fn all(value: Length) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }

    /// One to four values in top, right, bottom, left order with the usual
    /// shorthand expansion.
    pub fn parse(raw: &str) -> Option<Padding> {
        let parts = raw
            .split(|ch: char| ch == ',' || ch.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(Length::parse)
            .collect::<Option<Vec<_>>>()?;
        let padding = match parts.as_slice() {
            [all] => Padding::all(*all),
            [vertical, horizontal] => Padding {
                top: *vertical,
                right: *horizontal,
                bottom: *vertical,
                left: *horizontal,
            },
            [top, horizontal, bottom] => Padding {
                top: *top,
                right: *horizontal,
                bottom: *bottom,
                left: *horizontal,
            },
            [top, right, bottom, left] => Padding {
                top: *top,
                right: *right,
                bottom: *bottom,
                left: *left,
            },
            _ => return None,
        };
        Some(padding)
    }

    pub fn resolve(&self, ctx: &LengthContext) -> Edges {
        Edges {
            top: self.top.resolve(ctx),
            right: self.right.resolve(ctx),
            bottom: self.bottom.resolve(ctx),
            left: self.left.resolve(ctx),
        }
    }
}
