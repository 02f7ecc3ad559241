//! Static font-metric table for the report's single font family.
//!
//! Character widths are in em units (relative to font size); multiply by the
//! point size for widths in PDF points. The table covers ASCII 0x20..=0x7E;
//! everything else falls back to an average width. This approximation is
//! enough to drive word-wrap and page-break decisions — the report never
//! needs glyph-exact layout.

/// Static character-width table for a base-14 PDF font.
///
/// `widths[i]` = width of ASCII character `(i + 32)` in em units.
pub struct FontMetricTable {
    widths: [f32; 95],
    /// Fallback width for non-ASCII characters.
    pub average_char_width: f32,
}

impl FontMetricTable {
    /// Measures the rendered width of a string in em units.
    pub fn measure_str(&self, s: &str) -> f32 {
        s.chars()
            .map(|c| {
                let code = c as usize;
                if (32..=126).contains(&code) {
                    self.widths[code - 32]
                } else {
                    self.average_char_width
                }
            })
            .sum()
    }

    /// Width of a string in points at the given font size.
    pub fn text_width(&self, s: &str, font_size_pt: f32) -> f32 {
        self.measure_str(s) * font_size_pt
    }

    /// Greedy word-wrap to a maximum line width in points.
    ///
    /// A single word wider than the line gets its own line rather than being
    /// broken mid-word; pagination absorbs the overshoot.
    pub fn wrap(&self, s: &str, font_size_pt: f32, max_width_pt: f32) -> Vec<String> {
        let words: Vec<&str> = s.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }

        let space_w = self.text_width(" ", font_size_pt);
        let mut lines = Vec::new();
        let mut current = String::new();
        let mut current_width = 0.0_f32;

        for word in words {
            let word_w = self.text_width(word, font_size_pt);
            if current.is_empty() {
                current.push_str(word);
                current_width = word_w;
            } else if current_width + space_w + word_w > max_width_pt {
                lines.push(std::mem::take(&mut current));
                current.push_str(word);
                current_width = word_w;
            } else {
                current.push(' ');
                current.push_str(word);
                current_width += space_w + word_w;
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        lines
    }

    /// Truncates a string to fit a column, appending an ellipsis when cut.
    pub fn truncate_to_width(&self, s: &str, font_size_pt: f32, max_width_pt: f32) -> String {
        if self.text_width(s, font_size_pt) <= max_width_pt {
            return s.to_string();
        }
        let ellipsis_w = self.text_width("...", font_size_pt);
        let mut out = String::new();
        let mut width = 0.0_f32;
        for c in s.chars() {
            let cw = self.text_width(&c.to_string(), font_size_pt);
            if width + cw + ellipsis_w > max_width_pt {
                break;
            }
            out.push(c);
            width += cw;
        }
        out.push_str("...");
        out
    }
}

/// Helvetica — widths from the standard AFM, divided by 1000.
#[rustfmt::skip]
static HELVETICA_TABLE: FontMetricTable = FontMetricTable {
    widths: [
        // sp     !      "      #      $      %      &      '      (      )      *      +      ,      -      .      /
        0.278, 0.278, 0.355, 0.556, 0.556, 0.889, 0.667, 0.191, 0.333, 0.333, 0.389, 0.584, 0.278, 0.333, 0.278, 0.278,
        // 0      1      2      3      4      5      6      7      8      9
        0.556, 0.556, 0.556, 0.556, 0.556, 0.556, 0.556, 0.556, 0.556, 0.556,
        // :      ;      <      =      >      ?      @
        0.278, 0.278, 0.584, 0.584, 0.584, 0.556, 1.015,
        // A      B      C      D      E      F      G      H      I      J      K      L      M
        0.667, 0.667, 0.722, 0.722, 0.667, 0.611, 0.778, 0.722, 0.278, 0.500, 0.667, 0.556, 0.833,
        // N      O      P      Q      R      S      T      U      V      W      X      Y      Z
        0.722, 0.778, 0.667, 0.778, 0.722, 0.667, 0.611, 0.722, 0.667, 0.944, 0.667, 0.667, 0.611,
        // [      \      ]      ^      _      `
        0.278, 0.278, 0.278, 0.469, 0.556, 0.333,
        // a      b      c      d      e      f      g      h      i      j      k      l      m
        0.556, 0.556, 0.500, 0.556, 0.556, 0.278, 0.556, 0.556, 0.222, 0.222, 0.500, 0.222, 0.833,
        // n      o      p      q      r      s      t      u      v      w      x      y      z
        0.556, 0.556, 0.556, 0.556, 0.333, 0.500, 0.278, 0.556, 0.500, 0.722, 0.500, 0.500, 0.500,
        // {      |      }      ~
        0.334, 0.260, 0.334, 0.584,
    ],
    average_char_width: 0.55,
};

/// Returns the metric table for the report font.
pub fn helvetica() -> &'static FontMetricTable {
    &HELVETICA_TABLE
}
