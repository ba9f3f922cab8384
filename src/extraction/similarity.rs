//! String similarity helpers
//!
//! Fuzzy matching for OCR'd labels and a phonetic comparison between the
//! Arabic and Latin spellings of a name.

use serde::Serialize;
use strsim::normalized_levenshtein;

/// Calculate fuzzy text similarity between two strings
/// Returns a value from 0.0 (completely different) to 1.0 (identical)
/// Uses normalized Levenshtein distance for robust OCR error tolerance
pub fn fuzzy_text_similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a_normalized = a.trim().to_lowercase();
    let b_normalized = b.trim().to_lowercase();

    let base_similarity = normalized_levenshtein(&a_normalized, &b_normalized) as f32;

    // OCR often drops or invents punctuation: "N° du chassis" vs "N du chassis"
    let a_no_punct: String = a_normalized.chars().filter(|c| c.is_alphanumeric()).collect();
    let b_no_punct: String = b_normalized.chars().filter(|c| c.is_alphanumeric()).collect();

    let punct_similarity = if !a_no_punct.is_empty() && !b_no_punct.is_empty() {
        normalized_levenshtein(&a_no_punct, &b_no_punct) as f32
    } else {
        0.0
    };

    base_similarity.max(punct_similarity)
}

/// Result of comparing an Arabic name with its Latin transcription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameComparison {
    pub arabic_phonetic: String,
    pub latin_phonetic: String,
    pub score_consonants: f32,
    pub score_global: f32,
    /// Mean of the consonant and global scores
    pub score: f32,
    pub is_match: bool,
}

const MIN_CONSONANT_SCORE: f32 = 0.75;
const MIN_SCORE: f32 = 0.7;

/// Compare an Arabic name with a Latin one by transliterating the Arabic
/// side and comparing both full forms and consonant skeletons
pub fn compare_name_ar_fr(name_ar: &str, name_fr: &str) -> NameComparison {
    let arabic_phonetic: String = normalize_name(name_ar)
        .chars()
        .map(fold_arabic_variant)
        .map(arabic_to_latin)
        .collect();
    let latin_phonetic = normalize_name(name_fr);

    let score_consonants = similarity(&consonants(&arabic_phonetic), &consonants(&latin_phonetic));
    let score_global = similarity(&arabic_phonetic, &latin_phonetic);
    let score = (score_consonants + score_global) / 2.0;

    NameComparison {
        is_match: score_consonants >= MIN_CONSONANT_SCORE && score >= MIN_SCORE,
        arabic_phonetic,
        latin_phonetic,
        score_consonants,
        score_global,
        score,
    }
}

fn similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(a, b) as f32
}

/// Lowercase, strip French diacritics, keep only Latin and Arabic letters
fn normalize_name(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(strip_accent)
        .filter(|c| c.is_ascii_lowercase() || crate::vision::is_arabic_char(*c))
        .filter(|c| !is_arabic_mark(*c))
        .collect()
}

fn strip_accent(c: char) -> char {
    match c {
        'à' | 'â' | 'ä' | 'á' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'î' | 'ï' | 'í' => 'i',
        'ô' | 'ö' | 'ó' => 'o',
        'ù' | 'û' | 'ü' | 'ú' => 'u',
        'ç' => 'c',
        'ÿ' => 'y',
        other => other,
    }
}

/// Harakat, tatweel and other non-letter marks in the Arabic block
fn is_arabic_mark(c: char) -> bool {
    matches!(c, '\u{064B}'..='\u{065F}' | '\u{0670}' | '\u{0640}' | '\u{0610}'..='\u{061A}')
}

fn fold_arabic_variant(c: char) -> char {
    match c {
        'أ' | 'إ' | 'آ' => 'ا',
        'ى' | 'ئ' => 'ي',
        'ؤ' => 'و',
        'ة' => 'ه',
        other => other,
    }
}

fn arabic_to_latin(c: char) -> &'static str {
    match c {
        'ا' | 'ع' => "a",
        'ب' => "b",
        'ت' | 'ط' => "t",
        'ث' | 'س' | 'ص' => "s",
        'ج' => "j",
        'ح' | 'ه' => "h",
        'خ' => "kh",
        'د' | 'ذ' | 'ض' => "d",
        'ر' => "r",
        'ز' | 'ظ' => "z",
        'ش' => "sh",
        'غ' => "gh",
        'ف' => "f",
        'ق' | 'ك' => "k",
        'ل' => "l",
        'م' => "m",
        'ن' => "n",
        'و' => "u",
        'ي' => "i",
        _ => "",
    }
}

fn consonants(text: &str) -> String {
    text.chars().filter(|c| !"aeiou".contains(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuzzy_similarity() {
        assert!((fuzzy_text_similarity("Marque", "marque") - 1.0).abs() < 0.001);
        assert!((fuzzy_text_similarity("P.T.A.C", "PTAC") - 1.0).abs() < 0.001);
        assert!(fuzzy_text_similarity("Propriétaire", "Propriétalre") > 0.9);
        assert!(fuzzy_text_similarity("Marque", "Adresse") < 0.6);
        assert_eq!(fuzzy_text_similarity("", "x"), 0.0);
    }

    #[test]
    fn test_matching_names() {
        let result = compare_name_ar_fr("محمد", "MOHAMED");
        assert_eq!(result.arabic_phonetic, "mhmd");
        assert!((result.score_consonants - 1.0).abs() < 0.001);
        assert!(result.is_match);

        assert!(compare_name_ar_fr("فاطمة", "Fatima").is_match);
    }

    #[test]
    fn test_different_names() {
        let result = compare_name_ar_fr("محمد", "KARIM");
        assert!(!result.is_match);
        assert!(result.score < 0.5);
    }

    #[test]
    fn test_diacritics_and_marks_are_ignored() {
        let plain = compare_name_ar_fr("محمد", "Hélène");
        let marked = compare_name_ar_fr("مُحَمَّد", "Helene");
        assert_eq!(plain.arabic_phonetic, marked.arabic_phonetic);
        assert_eq!(plain.latin_phonetic, marked.latin_phonetic);
    }

    #[test]
    fn test_empty_inputs() {
        let result = compare_name_ar_fr("", "");
        assert_eq!(result.score, 0.0);
        assert!(!result.is_match);
    }
}
