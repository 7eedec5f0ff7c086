//! Physical key codes
//!
//! Keys are identified by their Linux evdev code, which is layout
//! independent. rdev reports named keys, so the table below maps them back
//! to evdev codes; keys rdev cannot name arrive as `Key::Unknown` carrying
//! the raw X keycode, which is the evdev code shifted by 8.

use rdev::Key;

/// Offset between X11 keycodes and evdev codes.
pub const X11_KEYCODE_OFFSET: u32 = 8;

/// Convert an rdev key to its evdev code.
pub fn key_to_code(key: Key) -> Option<u32> {
    let code = match key {
        Key::Escape => 1,
        Key::Num1 => 2,
        Key::Num2 => 3,
        Key::Num3 => 4,
        Key::Num4 => 5,
        Key::Num5 => 6,
        Key::Num6 => 7,
        Key::Num7 => 8,
        Key::Num8 => 9,
        Key::Num9 => 10,
        Key::Num0 => 11,
        Key::Minus => 12,
        Key::Equal => 13,
        Key::Backspace => 14,
        Key::Tab => 15,
        Key::KeyQ => 16,
        Key::KeyW => 17,
        Key::KeyE => 18,
        Key::KeyR => 19,
        Key::KeyT => 20,
        Key::KeyY => 21,
        Key::KeyU => 22,
        Key::KeyI => 23,
        Key::KeyO => 24,
        Key::KeyP => 25,
        Key::LeftBracket => 26,
        Key::RightBracket => 27,
        Key::Return => 28,
        Key::ControlLeft => 29,
        Key::KeyA => 30,
        Key::KeyS => 31,
        Key::KeyD => 32,
        Key::KeyF => 33,
        Key::KeyG => 34,
        Key::KeyH => 35,
        Key::KeyJ => 36,
        Key::KeyK => 37,
        Key::KeyL => 38,
        Key::SemiColon => 39,
        Key::Quote => 40,
        Key::BackQuote => 41,
        Key::ShiftLeft => 42,
        Key::BackSlash => 43,
        Key::KeyZ => 44,
        Key::KeyX => 45,
        Key::KeyC => 46,
        Key::KeyV => 47,
        Key::KeyB => 48,
        Key::KeyN => 49,
        Key::KeyM => 50,
        Key::Comma => 51,
        Key::Dot => 52,
        Key::Slash => 53,
        Key::ShiftRight => 54,
        Key::KpMultiply => 55,
        Key::Alt => 56,
        Key::Space => 57,
        Key::CapsLock => 58,
        Key::F1 => 59,
        Key::F2 => 60,
        Key::F3 => 61,
        Key::F4 => 62,
        Key::F5 => 63,
        Key::F6 => 64,
        Key::F7 => 65,
        Key::F8 => 66,
        Key::F9 => 67,
        Key::F10 => 68,
        Key::NumLock => 69,
        Key::ScrollLock => 70,
        Key::Kp7 => 71,
        Key::Kp8 => 72,
        Key::Kp9 => 73,
        Key::KpMinus => 74,
        Key::Kp4 => 75,
        Key::Kp5 => 76,
        Key::Kp6 => 77,
        Key::KpPlus => 78,
        Key::Kp1 => 79,
        Key::Kp2 => 80,
        Key::Kp3 => 81,
        Key::Kp0 => 82,
        Key::KpDelete => 83,
        Key::IntlBackslash => 86,
        Key::F11 => 87,
        Key::F12 => 88,
        Key::KpReturn => 96,
        Key::ControlRight => 97,
        Key::KpDivide => 98,
        Key::PrintScreen => 99,
        Key::AltGr => 100,
        Key::Home => 102,
        Key::UpArrow => 103,
        Key::PageUp => 104,
        Key::LeftArrow => 105,
        Key::RightArrow => 106,
        Key::End => 107,
        Key::DownArrow => 108,
        Key::PageDown => 109,
        Key::Insert => 110,
        Key::Delete => 111,
        Key::Pause => 119,
        Key::MetaLeft => 125,
        Key::MetaRight => 126,
        Key::Unknown(raw) if raw > X11_KEYCODE_OFFSET => raw - X11_KEYCODE_OFFSET,
        _ => return None,
    };
    Some(code)
}

/// Human readable name for a key, used when the OS gives no text for it.
///
/// Names follow the `snake_case` style of key names, e.g. `f6`, `page_up`,
/// `shift_left`. Letter and digit keys collapse to their character.
pub fn key_name(key: Key) -> String {
    let debug = format!("{:?}", key);
    if let Some(letter) = debug.strip_prefix("Key") {
        return letter.to_lowercase();
    }
    if let Some(digit) = debug.strip_prefix("Num").filter(|d| d.len() == 1) {
        return digit.to_string();
    }
    if let Key::Unknown(raw) = key {
        return format!("key {}", raw);
    }

    let mut name = String::with_capacity(debug.len() + 4);
    for (i, ch) in debug.chars().enumerate() {
        if ch.is_ascii_uppercase() && i > 0 {
            name.push('_');
        }
        name.push(ch.to_ascii_lowercase());
    }
    name
}

/// Format a display name the way binds are shown to the user.
///
/// Single characters are upper-cased; longer names have underscores turned
/// into spaces and each word capitalized.
pub fn pretty_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return "Key".to_string();
    }
    if trimmed.chars().count() == 1 {
        return trimmed.to_uppercase();
    }

    trimmed
        .replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
