use image::{ImageBuffer, Rgb};
use ml_core::Detection;
use video_ingest::{Frame, FrameFormat};

/// Green in both RGB and BGR channel order.
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const GLYPH_ADVANCE: i32 = 6;

type BgrView<'a> = ImageBuffer<Rgb<u8>, &'a mut [u8]>;

/// Draw a box and `LABEL 0.90` caption for every detection, in place.
///
/// Frames that are not BGR8 or whose buffer does not match their size are left
/// untouched.
pub fn annotate_detections(frame: &mut Frame, detections: &[Detection]) {
    if detections.is_empty()
        || !matches!(frame.format, FrameFormat::Bgr8)
        || frame.width <= 0
        || frame.height <= 0
    {
        return;
    }
    let width = frame.width as u32;
    let height = frame.height as u32;
    let Some(mut image) = BgrView::from_raw(width, height, frame.data.as_mut_slice()) else {
        return;
    };

    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    for det in detections {
        let left = det.bbox[0].clamp(0.0, max_x).round() as i32;
        let top = det.bbox[1].clamp(0.0, max_y).round() as i32;
        let right = det.bbox[2].clamp(0.0, max_x).round() as i32;
        let bottom = det.bbox[3].clamp(0.0, max_y).round() as i32;
        draw_rectangle(&mut image, left, top, right, bottom, BOX_COLOR);
        draw_rectangle(&mut image, left + 1, top + 1, right - 1, bottom - 1, BOX_COLOR);

        let caption = format!("{} {:.2}", det.label, det.confidence);
        let label_y = (top - 12).max(0);
        let text_width = caption.chars().count() as i32 * GLYPH_ADVANCE;
        fill_rect(
            &mut image,
            left,
            label_y,
            left + text_width,
            label_y + 8,
            LABEL_BACKGROUND,
        );
        draw_label(&mut image, left + 1, label_y + 1, &caption, BOX_COLOR);
    }
}

fn draw_rectangle(image: &mut BgrView<'_>, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    if right < left || bottom < top {
        return;
    }
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for x in left..=right {
        image.put_pixel(x as u32, top as u32, color);
        image.put_pixel(x as u32, bottom as u32, color);
    }
    for y in top..=bottom {
        image.put_pixel(left as u32, y as u32, color);
        image.put_pixel(right as u32, y as u32, color);
    }
}

fn fill_rect(image: &mut BgrView<'_>, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_label(image: &mut BgrView<'_>, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            image.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

/// 5x7 bitmap glyphs, one `u8` per row, most significant of the low five bits leftmost.
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(width: i32, height: i32) -> Frame {
        Frame::from_bgr(vec![0; (width * height * 3) as usize], width, height, 0).unwrap()
    }

    fn pixel(frame: &Frame, x: i32, y: i32) -> [u8; 3] {
        let idx = ((y * frame.width + x) * 3) as usize;
        [frame.data[idx], frame.data[idx + 1], frame.data[idx + 2]]
    }

    #[test]
    fn draws_box_edges_in_green() {
        let mut frame = blank(64, 64);
        let det = Detection::new("book", 0.9, [10.0, 20.0, 40.0, 50.0]);
        annotate_detections(&mut frame, &[det]);
        assert_eq!(pixel(&frame, 10, 30), [0, 255, 0]);
        assert_eq!(pixel(&frame, 40, 30), [0, 255, 0]);
        assert_eq!(pixel(&frame, 25, 50), [0, 255, 0]);
        // Interior stays untouched.
        assert_eq!(pixel(&frame, 25, 35), [0, 0, 0]);
    }

    #[test]
    fn boxes_outside_the_frame_are_clamped() {
        let mut frame = blank(16, 16);
        let det = Detection::new("book", 0.75, [-5.0, -5.0, 100.0, 100.0]);
        annotate_detections(&mut frame, &[det]);
        assert_eq!(pixel(&frame, 15, 15), [0, 255, 0]);
    }

    #[test]
    fn no_detections_leave_the_frame_unchanged() {
        let mut frame = blank(8, 8);
        annotate_detections(&mut frame, &[]);
        assert!(frame.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn every_caption_character_has_a_glyph() {
        for ch in "abcdefghijklmnopqrstuvwxyz0123456789 .-%".chars() {
            let upper = ch.to_ascii_uppercase();
            assert!(glyph_bits(upper).is_some(), "missing glyph for {upper:?}");
        }
    }
}
