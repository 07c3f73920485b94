//! Typed views of engine codes
//!
//! The engine speaks integers; callers get these enums.

use serde::{Deserialize, Serialize};

/// Page rotation, clockwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageRotation {
    None,
    Deg90,
    Deg180,
    Deg270,
}

impl PageRotation {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(PageRotation::None),
            1 => Some(PageRotation::Deg90),
            2 => Some(PageRotation::Deg180),
            3 => Some(PageRotation::Deg270),
            _ => None,
        }
    }
}

/// Kind of a bookmark or link action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Unsupported,
    Goto,
    RemoteGoto,
    Uri,
    Launch,
    EmbeddedGoto,
}

impl ActionType {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => ActionType::Goto,
            2 => ActionType::RemoteGoto,
            3 => ActionType::Uri,
            4 => ActionType::Launch,
            5 => ActionType::EmbeddedGoto,
            _ => ActionType::Unsupported,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            ActionType::Unsupported => 0,
            ActionType::Goto => 1,
            ActionType::RemoteGoto => 2,
            ActionType::Uri => 3,
            ActionType::Launch => 4,
            ActionType::EmbeddedGoto => 5,
        }
    }
}

/// Annotation subtypes in engine code order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationSubtype {
    Unknown,
    Text,
    Link,
    FreeText,
    Line,
    Square,
    Circle,
    Polygon,
    Polyline,
    Highlight,
    Underline,
    Squiggly,
    Strikeout,
    Stamp,
    Caret,
    Ink,
    Popup,
    FileAttachment,
    Sound,
    Movie,
    Widget,
    Screen,
    PrinterMark,
    TrapNet,
    Watermark,
    ThreeD,
    RichMedia,
    XfaWidget,
    Redact,
}

const ANNOTATION_SUBTYPES: [AnnotationSubtype; 29] = [
    AnnotationSubtype::Unknown,
    AnnotationSubtype::Text,
    AnnotationSubtype::Link,
    AnnotationSubtype::FreeText,
    AnnotationSubtype::Line,
    AnnotationSubtype::Square,
    AnnotationSubtype::Circle,
    AnnotationSubtype::Polygon,
    AnnotationSubtype::Polyline,
    AnnotationSubtype::Highlight,
    AnnotationSubtype::Underline,
    AnnotationSubtype::Squiggly,
    AnnotationSubtype::Strikeout,
    AnnotationSubtype::Stamp,
    AnnotationSubtype::Caret,
    AnnotationSubtype::Ink,
    AnnotationSubtype::Popup,
    AnnotationSubtype::FileAttachment,
    AnnotationSubtype::Sound,
    AnnotationSubtype::Movie,
    AnnotationSubtype::Widget,
    AnnotationSubtype::Screen,
    AnnotationSubtype::PrinterMark,
    AnnotationSubtype::TrapNet,
    AnnotationSubtype::Watermark,
    AnnotationSubtype::ThreeD,
    AnnotationSubtype::RichMedia,
    AnnotationSubtype::XfaWidget,
    AnnotationSubtype::Redact,
];

impl AnnotationSubtype {
    pub fn from_code(code: u32) -> Self {
        ANNOTATION_SUBTYPES
            .get(code as usize)
            .copied()
            .unwrap_or(AnnotationSubtype::Unknown)
    }

    pub fn code(self) -> u32 {
        ANNOTATION_SUBTYPES
            .iter()
            .position(|s| *s == self)
            .map(|p| p as u32)
            .unwrap_or(0)
    }

    /// Parse the lowercase names used in serialized memory documents
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "text" => AnnotationSubtype::Text,
            "link" => AnnotationSubtype::Link,
            "freetext" => AnnotationSubtype::FreeText,
            "line" => AnnotationSubtype::Line,
            "square" => AnnotationSubtype::Square,
            "circle" => AnnotationSubtype::Circle,
            "polygon" => AnnotationSubtype::Polygon,
            "polyline" => AnnotationSubtype::Polyline,
            "highlight" => AnnotationSubtype::Highlight,
            "underline" => AnnotationSubtype::Underline,
            "squiggly" => AnnotationSubtype::Squiggly,
            "strikeout" => AnnotationSubtype::Strikeout,
            "stamp" => AnnotationSubtype::Stamp,
            "caret" => AnnotationSubtype::Caret,
            "ink" => AnnotationSubtype::Ink,
            "popup" => AnnotationSubtype::Popup,
            "fileattachment" => AnnotationSubtype::FileAttachment,
            "sound" => AnnotationSubtype::Sound,
            "movie" => AnnotationSubtype::Movie,
            "widget" => AnnotationSubtype::Widget,
            "screen" => AnnotationSubtype::Screen,
            "printermark" => AnnotationSubtype::PrinterMark,
            "trapnet" => AnnotationSubtype::TrapNet,
            "watermark" => AnnotationSubtype::Watermark,
            "threed" => AnnotationSubtype::ThreeD,
            "richmedia" => AnnotationSubtype::RichMedia,
            "xfawidget" => AnnotationSubtype::XfaWidget,
            "redact" => AnnotationSubtype::Redact,
            _ => AnnotationSubtype::Unknown,
        }
    }
}
