//! Severities, diagnostic kinds and their visual attributes.
//!
//! Severities form a closed, ordered enum. Each [`DiagnosticKind`] carries a default severity and
//! a default [`AttributesKey`]; hosts map attribute keys to concrete colors/underlines.

use serde::{Deserialize, Serialize};

/// Diagnostic severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Pseudo severity used for symbol-type coloring (no problem is reported).
    TextAttributes,
    /// Informational highlighting.
    #[default]
    Information,
    /// Weak warning (e.g. style issues).
    WeakWarning,
    /// Warning.
    Warning,
    /// Error.
    Error,
}

impl Severity {
    /// `true` for [`Severity::Error`].
    pub fn is_error(&self) -> bool {
        *self == Severity::Error
    }

    /// Default attributes key used to render this severity.
    pub fn default_attributes(&self) -> AttributesKey {
        match self {
            Severity::TextAttributes => AttributesKey::SYMBOL,
            Severity::Information => AttributesKey::INFORMATION,
            Severity::WeakWarning => AttributesKey::WEAK_WARNING,
            Severity::Warning => AttributesKey::WARNING,
            Severity::Error => AttributesKey::ERROR,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TextAttributes => write!(f, "text-attributes"),
            Self::Information => write!(f, "information"),
            Self::WeakWarning => write!(f, "weak-warning"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Identifies a host-defined text style (underline color, background, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributesKey(pub u32);

impl AttributesKey {
    /// Red squiggle.
    pub const ERROR: Self = Self(0x0500_0001);
    /// Yellow squiggle.
    pub const WARNING: Self = Self(0x0500_0002);
    /// Faint underline.
    pub const WEAK_WARNING: Self = Self(0x0500_0003);
    /// Information (usually invisible unless customized).
    pub const INFORMATION: Self = Self(0x0500_0004);
    /// Strikethrough.
    pub const DEPRECATED: Self = Self(0x0500_0005);
    /// Grayed-out text.
    pub const UNUSED: Self = Self(0x0500_0006);
    /// Red text for unresolved references.
    pub const WRONG_REFERENCE: Self = Self(0x0500_0007);
    /// Symbol coloring.
    pub const SYMBOL: Self = Self(0x0500_0008);

    /// Create a key from a raw numeric identifier.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

/// Underline/box effect drawn by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EffectType {
    /// Wavy underline.
    WaveUnderscore,
    /// Straight underline.
    LineUnderscore,
    /// Strikethrough.
    StrikeOut,
    /// Rectangle around the range.
    Boxed,
}

/// Explicit visual attributes forcing a look independent of the attributes key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TextAttributes {
    /// Foreground color as `0xRRGGBB`.
    pub foreground: Option<u32>,
    /// Background color as `0xRRGGBB`.
    pub background: Option<u32>,
    /// Effect decoration.
    pub effect: Option<EffectType>,
    /// Effect color as `0xRRGGBB`.
    pub effect_color: Option<u32>,
}

/// Closed set of diagnostic kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Generic error.
    Error,
    /// Generic warning.
    Warning,
    /// Generic weak warning.
    WeakWarning,
    /// Informational highlighting.
    Information,
    /// Use of a deprecated symbol.
    Deprecated,
    /// Unused declaration.
    UnusedSymbol,
    /// Reference that cannot be resolved.
    WrongReference,
    /// Symbol coloring without a problem attached.
    SymbolType,
}

impl DiagnosticKind {
    /// Intrinsic severity used when the builder does not set one.
    pub fn default_severity(&self) -> Severity {
        match self {
            DiagnosticKind::Error | DiagnosticKind::WrongReference => Severity::Error,
            DiagnosticKind::Warning | DiagnosticKind::Deprecated | DiagnosticKind::UnusedSymbol => {
                Severity::Warning
            }
            DiagnosticKind::WeakWarning => Severity::WeakWarning,
            DiagnosticKind::Information => Severity::Information,
            DiagnosticKind::SymbolType => Severity::TextAttributes,
        }
    }

    /// Default attributes for this kind.
    pub fn default_attributes(&self) -> AttributesKey {
        match self {
            DiagnosticKind::Error => AttributesKey::ERROR,
            DiagnosticKind::Warning => AttributesKey::WARNING,
            DiagnosticKind::WeakWarning => AttributesKey::WEAK_WARNING,
            DiagnosticKind::Information => AttributesKey::INFORMATION,
            DiagnosticKind::Deprecated => AttributesKey::DEPRECATED,
            DiagnosticKind::UnusedSymbol => AttributesKey::UNUSED,
            DiagnosticKind::WrongReference => AttributesKey::WRONG_REFERENCE,
            DiagnosticKind::SymbolType => AttributesKey::SYMBOL,
        }
    }
}

/// Overlay z-order. Higher layers paint over lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Layer(pub u32);

impl Layer {
    /// Symbol coloring layer.
    pub const ADDITIONAL_SYNTAX: Self = Self(1000);
    /// Information layer.
    pub const INFORMATION: Self = Self(3000);
    /// Weak warning layer.
    pub const WEAK_WARNING: Self = Self(3500);
    /// Warning layer.
    pub const WARNING: Self = Self(4000);
    /// Error layer.
    pub const ERROR: Self = Self(5000);

    /// Layer used to render diagnostics of the given severity.
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::TextAttributes => Self::ADDITIONAL_SYNTAX,
            Severity::Information => Self::INFORMATION,
            Severity::WeakWarning => Self::WEAK_WARNING,
            Severity::Warning => Self::WARNING,
            Severity::Error => Self::ERROR,
        }
    }
}

/// Icon shown in the gutter next to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GutterMarker {
    /// Host-defined icon identifier.
    pub icon: String,
    /// Tooltip shown when hovering the icon.
    pub tooltip: Option<String>,
}

impl GutterMarker {
    /// Create a gutter marker without tooltip.
    pub fn new(icon: impl Into<String>) -> Self {
        Self {
            icon: icon.into(),
            tooltip: None,
        }
    }

    /// Attach a tooltip.
    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }
}
