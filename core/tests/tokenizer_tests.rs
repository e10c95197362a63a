use flatdb_core::tokenizer::{Normalizer, StopWords, TextNormalizer};
use std::sync::Arc;

#[test]
fn it_folds_case_accents_and_punctuation() {
    let n = TextNormalizer::default();
    let words = n.normalize("Canções, LINDAS! foram escritas... (Açaí)").unwrap();
    assert_eq!(words, vec!["cancoes", "lindas", "foram", "escritas", "acai"]);
}

#[test]
fn it_filters_stopwords() {
    let n = TextNormalizer::default();
    let words = n.normalize("O Auto da Compadecida e a Pedra do Reino").unwrap();
    assert!(!words.contains(&"o".to_string()));
    assert!(!words.contains(&"da".to_string()));
    assert!(!words.contains(&"e".to_string()));
    assert_eq!(words, vec!["auto", "compadecida", "pedra", "reino"]);
}

#[test]
fn accented_stopwords_match_their_folded_form() {
    let n = TextNormalizer::default();
    assert!(n.normalize("NÃO não nao").unwrap().is_empty());
}

#[test]
fn it_keeps_names_without_stopwords() {
    let n = TextNormalizer::default();
    assert_eq!(n.normalize("Breaking Bad").unwrap(), vec!["breaking", "bad"]);
    assert_eq!(n.normalize("Black Mirror").unwrap(), vec!["black", "mirror"]);
}

#[test]
fn tokens_without_letters_disappear() {
    let n = TextNormalizer::default();
    assert_eq!(n.normalize("24 -- 1984 ?! Lost").unwrap(), vec!["lost"]);
    assert!(n.normalize("   ").unwrap().is_empty());
}

#[test]
fn normalization_is_idempotent() {
    let n = TextNormalizer::default();
    for text in [
        "The Office (US) — Temporada 3",
        "Ação e Reação: o Retorno",
        "Ångström über straße ÇÉdille",
        "Ŀlum ŉ İstanbul",
    ] {
        let once = n.normalize(text).unwrap();
        let twice = n.normalize(&once.join(" ")).unwrap();
        assert_eq!(once, twice, "not idempotent for {text:?}");
    }
}

#[test]
fn injected_stopwords_replace_the_default_list() {
    let n = TextNormalizer::new(Arc::new(StopWords::new(["the", "of"])));
    assert_eq!(n.normalize("The Lord of the Rings").unwrap(), vec!["lord", "rings"]);
    assert_eq!(n.normalize("o e a").unwrap(), vec!["o", "e", "a"]);
}
