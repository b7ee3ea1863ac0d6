/// Normalize an academic-year label before it is used to read or write history.
///
/// Strict mode only accepts two consecutive years (`2024/2025`, `2024-2025`,
/// `2024 / 2025`) and always returns the slash form. Non-strict mode keeps any
/// non-empty label as typed, trimmed.
pub fn canonicalize(label: &str, strict: bool) -> Result<String, String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err("tahun ajaran wajib diisi".to_string());
    }
    if !strict {
        return Ok(trimmed.to_string());
    }

    let Some((left, right)) = trimmed.split_once(['/', '-']) else {
        return Err(format!(
            "tahun ajaran '{}' harus berformat YYYY/YYYY",
            trimmed
        ));
    };
    let first = parse_year(left.trim()).ok_or_else(|| {
        format!("tahun ajaran '{}' harus berformat YYYY/YYYY", trimmed)
    })?;
    let second = parse_year(right.trim()).ok_or_else(|| {
        format!("tahun ajaran '{}' harus berformat YYYY/YYYY", trimmed)
    })?;
    if second != first + 1 {
        return Err(format!(
            "tahun ajaran '{}' harus terdiri dari dua tahun berurutan",
            trimmed
        ));
    }
    Ok(format!("{}/{}", first, second))
}

fn parse_year(s: &str) -> Option<u32> {
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_accepts_common_spellings() {
        assert_eq!(canonicalize("2024/2025", true).unwrap(), "2024/2025");
        assert_eq!(canonicalize(" 2024-2025 ", true).unwrap(), "2024/2025");
        assert_eq!(canonicalize("2024 / 2025", true).unwrap(), "2024/2025");
    }

    #[test]
    fn strict_rejects_non_consecutive_or_malformed() {
        assert!(canonicalize("2024/2026", true).is_err());
        assert!(canonicalize("24/25", true).is_err());
        assert!(canonicalize("Tahun 2024", true).is_err());
        assert!(canonicalize("   ", true).is_err());
    }

    #[test]
    fn lenient_keeps_label_verbatim() {
        assert_eq!(
            canonicalize("  Semester Genap 2024 ", false).unwrap(),
            "Semester Genap 2024"
        );
        assert!(canonicalize("", false).is_err());
    }
}
