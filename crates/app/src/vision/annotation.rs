//! Overlay drawing for display frames.
//!
//! Everything is rasterised with a 5×7 bitmap font and simple rectangle fills
//! so the overlay needs nothing beyond the `image` crate.

use chrono::{DateTime, Local};
use image::{Rgb, RgbImage};
use ml_core::HazardType;

use crate::vision::state::DetectionState;

const HUD_BAR_HEIGHT: i32 = 38;
const BORDER_THICKNESS: i32 = 10;
const DESCRIPTION_MAX_CHARS: usize = 85;
const GLYPH_ADVANCE: i32 = 6;
const GLYPH_HEIGHT: i32 = 7;

const CLEAR_GREEN: Rgb<u8> = Rgb([70, 210, 0]);
const ALERT_ORANGE: Rgb<u8> = Rgb([255, 80, 40]);
const MUTED_GREY: Rgb<u8> = Rgb([150, 150, 150]);
const DIM_GREY: Rgb<u8> = Rgb([110, 110, 110]);
const CAPTION_GREY: Rgb<u8> = Rgb([200, 200, 200]);
const SHADOW: Rgb<u8> = Rgb([0, 0, 0]);

/// Render the current detection state onto a display frame.
pub(crate) fn render_overlay(image: &mut RgbImage, state: &DetectionState, now: DateTime<Local>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }

    if state.alert {
        draw_alert(image, state.hazard, now);
    }

    let bar_y = (height - HUD_BAR_HEIGHT).max(0);
    blend_rect(image, 0, bar_y, width, height, Rgb([8, 8, 8]), 0.6);

    let (status, status_color) = if state.alert {
        (state.hazard.as_str().to_uppercase(), ALERT_ORANGE)
    } else {
        ("CLEAR".to_string(), CLEAR_GREEN)
    };
    let text_y = bar_y + 12;
    draw_text(image, 10, text_y, &format!("STATUS: {status}"), status_color, 2);

    let latency = if state.latency_ms > 0 {
        format!("VLM: {}MS", state.latency_ms)
    } else {
        "VLM: --".to_string()
    };
    draw_text(image, width / 3, text_y, &latency, MUTED_GREY, 2);

    let clock = now.format("%H:%M:%S").to_string();
    let clock_width = text_width(&clock, 2);
    draw_text(image, width - clock_width - 10, text_y, &clock, DIM_GREY, 2);

    let description = state.description.trim();
    if description.chars().count() > 3 {
        let short: String = description.chars().take(DESCRIPTION_MAX_CHARS).collect();
        let caption_y = bar_y - GLYPH_HEIGHT - 6;
        draw_text(image, 11, caption_y + 1, &short, SHADOW, 1);
        draw_text(image, 10, caption_y, &short, CAPTION_GREY, 1);
    }
}

fn draw_alert(image: &mut RgbImage, hazard: HazardType, now: DateTime<Local>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let fire = hazard.involves_fire();

    let tint = if fire { Rgb([160, 0, 0]) } else { Rgb([40, 60, 80]) };
    blend_rect(image, 0, 0, width, height, tint, 0.2);

    // 2 Hz blink.
    if (now.timestamp_millis() / 500) % 2 == 0 {
        let border = if fire { Rgb([255, 0, 0]) } else { Rgb([80, 120, 140]) };
        draw_frame_border(image, border, BORDER_THICKNESS);
    }

    let label = match hazard {
        HazardType::Fire => "!! FIRE DETECTED !!",
        HazardType::Smoke => "!! SMOKE DETECTED !!",
        HazardType::Both => "!! FIRE & SMOKE !!",
        HazardType::None => "!! ALERT !!",
    };
    let scale = (width / 300).max(2);
    let label_x = ((width - text_width(label, scale)) / 2).max(0);
    let label_y = height * 18 / 100;
    let color = if fire {
        Rgb([255, 120, 60])
    } else {
        Rgb([255, 200, 180])
    };
    draw_text(image, label_x + 2, label_y + 2, label, SHADOW, scale);
    draw_text(image, label_x, label_y, label, color, scale);
}

pub(crate) fn text_width(text: &str, scale: i32) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE * scale
}

fn draw_frame_border(image: &mut RgbImage, color: Rgb<u8>, thickness: i32) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    fill_rect(image, 0, 0, width, thickness, color);
    fill_rect(image, 0, height - thickness, width, height, color);
    fill_rect(image, 0, 0, thickness, height, color);
    fill_rect(image, width - thickness, 0, width, height, color);
}

/// Clamp a half-open rectangle to the image bounds.
fn clip(image: &RgbImage, left: i32, top: i32, right: i32, bottom: i32) -> Option<(u32, u32, u32, u32)> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width);
    let right = right.clamp(0, width);
    let top = top.clamp(0, height);
    let bottom = bottom.clamp(0, height);
    if left >= right || top >= bottom {
        return None;
    }
    Some((left as u32, top as u32, right as u32, bottom as u32))
}

pub(crate) fn fill_rect(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let Some((left, top, right, bottom)) = clip(image, left, top, right, bottom) else {
        return;
    };
    for y in top..bottom {
        for x in left..right {
            image.put_pixel(x, y, color);
        }
    }
}

/// Alpha-blend `color` over a rectangle; `alpha` is the weight of `color`.
pub(crate) fn blend_rect(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
    alpha: f32,
) {
    let Some((left, top, right, bottom)) = clip(image, left, top, right, bottom) else {
        return;
    };
    let alpha = alpha.clamp(0.0, 1.0);
    for y in top..bottom {
        for x in left..right {
            let pixel = image.get_pixel_mut(x, y);
            for (dst, src) in pixel.0.iter_mut().zip(color.0) {
                *dst = (*dst as f32 * (1.0 - alpha) + src as f32 * alpha).round() as u8;
            }
        }
    }
}

/// Draw `text` with its top-left corner at (`x`, `y`), each glyph pixel `scale`×`scale`.
pub(crate) fn draw_text(
    image: &mut RgbImage,
    mut x: i32,
    y: i32,
    text: &str,
    color: Rgb<u8>,
    scale: i32,
) {
    let scale = scale.max(1);
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col * scale;
                        let py = y + row as i32 * scale;
                        fill_rect(image, px, py, px + scale, py + scale, color);
                    }
                }
            }
        }
        x += GLYPH_ADVANCE * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
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
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00000, 0b00100],
        '&' => [0b01100, 0b10010, 0b10100, 0b01000, 0b10101, 0b10010, 0b01101],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '+' => [0, 0b00100, 0b00100, 0b11111, 0b00100, 0b00100, 0],
        '=' => [0, 0, 0b11111, 0, 0b11111, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        ',' => [0, 0, 0, 0, 0b00110, 0b00100, 0b01000],
        '\'' => [0b00100, 0b00100, 0b01000, 0, 0, 0, 0],
        '"' => [0b01010, 0b01010, 0, 0, 0, 0, 0],
        '?' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::TimeZone;
    use ml_core::Confidence;

    use super::*;
    use crate::vision::state::StateStore;

    fn state(alert: bool, hazard: HazardType) -> DetectionState {
        let mut state = StateStore::new(Path::new("logs/test.log")).snapshot();
        state.alert = alert;
        state.hazard = hazard;
        state.confidence = Confidence::High;
        state.description = "Thick grey smoke plume rising from lower left".into();
        state.latency_ms = 812;
        state
    }

    fn blink_on() -> DateTime<Local> {
        Local.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn blink_off() -> DateTime<Local> {
        Local.timestamp_millis_opt(1_700_000_000_500).unwrap()
    }

    #[test]
    fn clear_frame_keeps_corners_and_darkens_hud_bar() {
        let mut image = RgbImage::from_pixel(320, 180, Rgb([200, 200, 200]));
        render_overlay(&mut image, &state(false, HazardType::None), blink_on());

        assert_eq!(image.get_pixel(0, 0).0, [200, 200, 200]);
        let bar = image.get_pixel(319, 179).0;
        assert!(bar[0] < 100, "HUD bar should be darkened, got {bar:?}");
    }

    #[test]
    fn fire_alert_draws_red_border_when_blink_is_on() {
        let mut image = RgbImage::from_pixel(320, 180, Rgb([200, 200, 200]));
        render_overlay(&mut image, &state(true, HazardType::Fire), blink_on());
        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0]);

        let mut image = RgbImage::from_pixel(320, 180, Rgb([200, 200, 200]));
        render_overlay(&mut image, &state(true, HazardType::Fire), blink_off());
        let tinted = image.get_pixel(0, 0).0;
        assert_ne!(tinted, [255, 0, 0]);
        assert!(tinted[0] > tinted[1], "expected red tint, got {tinted:?}");
    }

    #[test]
    fn text_lights_pixels_at_scale() {
        let mut image = RgbImage::new(40, 20);
        draw_text(&mut image, 0, 0, "I", Rgb([255, 255, 255]), 2);
        // Top bar of 'I' spans columns 1..=3 in glyph space.
        assert_eq!(image.get_pixel(2, 0).0, [255, 255, 255]);
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(text_width("ABC", 2), 36);
    }

    #[test]
    fn tiny_frames_do_not_panic() {
        let mut image = RgbImage::new(4, 4);
        render_overlay(&mut image, &state(true, HazardType::Both), blink_on());
        let mut empty = RgbImage::new(0, 0);
        render_overlay(&mut empty, &state(true, HazardType::Smoke), blink_on());
    }
}
