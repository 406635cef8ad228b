//! Terminal mouth renderer.

use buddy_voice::MouthShape;
use std::io::Write;

/// A one-line sketch of the mouth for `shape`.
pub fn mouth_art(shape: MouthShape) -> &'static str {
    match shape {
        MouthShape::Default => "  ───  ",
        MouthShape::O => "  ( O ) ",
        MouthShape::Cdgknstxyz => "  [===] ",
        MouthShape::Ee => "  <═══> ",
        MouthShape::Bmp => "  ═════ ",
        MouthShape::Aei => "  ( ▽ ) ",
        MouthShape::U => "   (o)  ",
        MouthShape::Th => "  [=ᵕ=] ",
        MouthShape::ShChJ => "  {###} ",
        MouthShape::Qw => "   (°)  ",
        MouthShape::L => "  ( ᴗ ) ",
        MouthShape::Fv => "  [ᵥᵥᵥ] ",
    }
}

/// Redraw the face in place on the current terminal line.
pub fn render(shape: MouthShape) {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "\r  ◕   ◕  {}  {:<10}", mouth_art(shape), shape);
    let _ = out.flush();
}
