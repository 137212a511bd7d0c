//! Lesson document model returned to the front-end, and the schema check that
//! turns raw model JSON into it.
//!
//! Deserialization is lenient where models commonly drift (numeric levels,
//! missing or `null` arrays and strings, numeric reference ids);
//! `LessonDocument::normalize` then drops empty entries and enforces the
//! structural rules. Anything that still does not fit is reported as a
//! schema violation.

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Minimum number of classroom activities a lesson must carry.
pub const MIN_ACTIVITIES: usize = 2;

/// Token written for vocabulary outside the proficiency reference list.
pub const UNLISTED_TOKEN: &str = "無";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LessonDocument {
  #[serde(deserialize_with = "de_null_default")]
  pub main_level: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub warm_up: Option<Vec<String>>,
  /// `null` stands for an empty section; an absent section is a violation.
  #[serde(deserialize_with = "de_null_default")]
  pub dialogue: Dialogue,
  #[serde(deserialize_with = "de_null_default")]
  pub essay: Essay,
  #[serde(deserialize_with = "de_null_default")]
  pub activities: Vec<Activity>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Dialogue {
  #[serde(default, deserialize_with = "de_null_default")] pub title: String,
  #[serde(default, deserialize_with = "de_null_default")] pub lines: Vec<DialogueLine>,
  #[serde(default, deserialize_with = "de_null_default")] pub vocabulary: Vec<VocabEntry>,
  #[serde(default, deserialize_with = "de_null_default")] pub grammar: Vec<GrammarEntry>,
  #[serde(default, deserialize_with = "de_null_default")] pub references: Vec<Reference>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DialogueLine {
  #[serde(default, deserialize_with = "de_null_default")] pub speaker: String,
  #[serde(default, deserialize_with = "de_null_default")] pub text: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Essay {
  #[serde(default, deserialize_with = "de_null_default")] pub title: String,
  #[serde(default, deserialize_with = "de_null_default")] pub paragraphs: Vec<String>,
  #[serde(default, deserialize_with = "de_null_default")] pub vocabulary: Vec<VocabEntry>,
  #[serde(default, deserialize_with = "de_null_default")] pub grammar: Vec<GrammarEntry>,
  #[serde(default, deserialize_with = "de_null_default")] pub references: Vec<Reference>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VocabEntry {
  #[serde(default, deserialize_with = "de_null_default")] pub word: String,
  #[serde(default, deserialize_with = "de_null_default")] pub pinyin: String,
  #[serde(default)] pub level: VocabLevel,
  #[serde(default, deserialize_with = "de_null_default")] pub english: String,
  #[serde(default, deserialize_with = "de_null_default")] pub japanese: String,
  #[serde(default, deserialize_with = "de_null_default")] pub korean: String,
  #[serde(default, deserialize_with = "de_null_default")] pub vietnamese: String,
  #[serde(default, rename = "partOfSpeech", alias = "part_of_speech", deserialize_with = "de_null_default")]
  pub part_of_speech: String,
  #[serde(default, deserialize_with = "de_null_default")] pub example: String,
}

impl VocabEntry {
  /// All four translations present. Models are told to fill them; we only report gaps.
  pub fn has_all_translations(&self) -> bool {
    [&self.english, &self.japanese, &self.korean, &self.vietnamese]
      .iter()
      .all(|s| !s.trim().is_empty())
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GrammarEntry {
  #[serde(default, deserialize_with = "de_null_default")] pub pattern: String,
  #[serde(deserialize_with = "de_grammar_level")]
  pub level: u8,
  #[serde(default, deserialize_with = "de_null_default")] pub english: String,
  #[serde(default, deserialize_with = "de_null_default")] pub example: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Reference {
  #[serde(default, deserialize_with = "de_lenient_string")] pub id: String,
  #[serde(default, deserialize_with = "de_lenient_string")] pub author: String,
  #[serde(default, deserialize_with = "de_lenient_string")] pub year: String,
  #[serde(default, deserialize_with = "de_lenient_string")] pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub source: Option<String>,
  #[serde(default, deserialize_with = "de_lenient_string")] pub url: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Activity {
  #[serde(default, deserialize_with = "de_null_default")] pub title: String,
  #[serde(default, deserialize_with = "de_null_default")] pub description: String,
}

/// Vocabulary proficiency level: band 1..=7 of the reference list, or unlisted ("無").
/// Serialized as the string token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VocabLevel {
  Band(u8),
  #[default]
  Unlisted,
}

impl VocabLevel {
  pub fn band(n: u8) -> Option<Self> {
    (1..=7).contains(&n).then_some(VocabLevel::Band(n))
  }

  pub fn token(&self) -> String {
    match self {
      VocabLevel::Band(n) => n.to_string(),
      VocabLevel::Unlisted => UNLISTED_TOKEN.to_string(),
    }
  }

  /// Map whatever the model wrote onto the token set, or explain why it can't be.
  pub fn from_json(v: Option<&Value>) -> Result<Self, String> {
    match v {
      None | Some(Value::Null) => Ok(VocabLevel::Unlisted),
      Some(Value::Number(n)) => {
        let as_int = n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64));
        match as_int {
          Some(0) => Ok(VocabLevel::Unlisted),
          Some(i) if (1..=7).contains(&i) => Ok(VocabLevel::Band(i as u8)),
          _ => Err(format!("vocabulary level {} is outside 1-7", n)),
        }
      }
      Some(Value::String(s)) => Self::from_token(s),
      Some(other) => Err(format!("vocabulary level has unexpected type: {}", other)),
    }
  }

  pub fn from_token(s: &str) -> Result<Self, String> {
    let t = s.trim();
    match t {
      "" | "無" | "无" | "0" => return Ok(VocabLevel::Unlisted),
      _ => {}
    }
    if t.eq_ignore_ascii_case("none") || t.eq_ignore_ascii_case("n/a") {
      return Ok(VocabLevel::Unlisted);
    }
    t.parse::<u8>()
      .ok()
      .and_then(VocabLevel::band)
      .ok_or_else(|| format!("vocabulary level `{}` is not one of 1-7 or {}", t, UNLISTED_TOKEN))
  }
}

impl Serialize for VocabLevel {
  fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&self.token())
  }
}

impl<'de> Deserialize<'de> for VocabLevel {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    VocabLevel::from_json(v.as_ref()).map_err(D::Error::custom)
  }
}

fn de_grammar_level<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
  let v = Value::deserialize(d)?;
  let n = match &v {
    Value::Number(n) => n.as_u64(),
    Value::String(s) => s.trim().parse::<u64>().ok(),
    _ => None,
  };
  match n {
    Some(n) if (1..=7).contains(&n) => Ok(n as u8),
    _ => Err(D::Error::custom(format!("grammar level {} is not an integer in 1-7", v))),
  }
}

fn de_null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Deserialize<'de> + Default,
{
  Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

fn de_lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
  match Option::<Value>::deserialize(d)? {
    None | Some(Value::Null) => Ok(String::new()),
    Some(Value::String(s)) => Ok(s),
    Some(Value::Number(n)) => Ok(n.to_string()),
    Some(Value::Bool(b)) => Ok(b.to_string()),
    Some(other) => Err(D::Error::custom(format!("expected a string, got {}", other))),
  }
}

impl LessonDocument {
  /// Deserialize + normalize in one step.
  pub fn from_value(v: Value) -> Result<Self, String> {
    let doc: LessonDocument = serde_json::from_value(v).map_err(|e| format!("schema mismatch: {}", e))?;
    doc.normalize()
  }

  /// Drop empty entries, then enforce the structural rules.
  pub fn normalize(mut self) -> Result<Self, String> {
    self.main_level = self.main_level.trim().to_string();
    if self.main_level.is_empty() {
      return Err("main_level is empty".into());
    }

    if let Some(w) = self.warm_up.as_mut() {
      w.retain(|s| !s.trim().is_empty());
    }

    self.dialogue.lines.retain(|l| !l.text.trim().is_empty());
    self.essay.paragraphs.retain(|p| !p.trim().is_empty());
    for vocab in [&mut self.dialogue.vocabulary, &mut self.essay.vocabulary] {
      vocab.retain(|v| !v.word.trim().is_empty());
    }
    for grammar in [&mut self.dialogue.grammar, &mut self.essay.grammar] {
      grammar.retain(|g| !g.pattern.trim().is_empty());
    }
    self.activities.retain(|a| !(a.title.trim().is_empty() && a.description.trim().is_empty()));

    if !self.dialogue.lines.is_empty() && !self.essay.paragraphs.is_empty() {
      return Err("both dialogue.lines and essay.paragraphs are populated".into());
    }
    if self.activities.len() < MIN_ACTIVITIES {
      return Err(format!(
        "expected at least {} activities, got {}",
        MIN_ACTIVITIES,
        self.activities.len()
      ));
    }
    Ok(self)
  }

  /// Vocabulary entries across both sections missing at least one translation.
  pub fn incomplete_vocab_count(&self) -> usize {
    self.dialogue.vocabulary.iter()
      .chain(self.essay.vocabulary.iter())
      .filter(|v| !v.has_all_translations())
      .count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn sample() -> Value {
    json!({
      "main_level": "Level 5",
      "summary": "A short dialogue about sustainability.",
      "warm_up": ["你平常注意環保議題嗎？", ""],
      "dialogue": {
        "title": "永續發展下的產業挑戰",
        "lines": [
          { "speaker": "張輝", "text": "近來得知邱研究員去歐洲考察。" },
          { "speaker": "邱麗", "text": "  " }
        ],
        "vocabulary": [{
          "word": "論壇", "pinyin": "lùn tán", "level": "7", "english": "Forum",
          "japanese": "フォーラム", "korean": "포럼", "vietnamese": "Diễn đàn",
          "partOfSpeech": "Noun", "example": "產業論壇上討論了永續發展議題。"
        }],
        "grammar": [{ "pattern": "換句話說", "level": 5, "english": "In other words", "example": "換句話說，……" }],
        "references": [{ "id": 1, "author": "SEMI Taiwan", "year": 2021, "title": "ESG", "url": "https://example.org" }]
      },
      "essay": { "title": "", "paragraphs": [] },
      "activities": [
        { "title": "模擬辯論賽", "description": "分成三組進行辯論。" },
        { "title": "王牌銷售員", "description": "向客戶推銷產品。" }
      ]
    })
  }

  #[test]
  fn accepts_and_normalizes_sample() {
    let doc = LessonDocument::from_value(sample()).unwrap();
    assert_eq!(doc.main_level, "Level 5");
    assert_eq!(doc.dialogue.lines.len(), 1);
    assert_eq!(doc.warm_up.as_ref().unwrap().len(), 1);
    assert_eq!(doc.dialogue.vocabulary[0].level, VocabLevel::Band(7));
    assert_eq!(doc.dialogue.references[0].id, "1");
    assert_eq!(doc.dialogue.references[0].year, "2021");
    assert!(doc.essay.vocabulary.is_empty());
    assert_eq!(doc.incomplete_vocab_count(), 0);
  }

  #[test]
  fn serializes_level_as_token_and_keeps_empty_arrays() {
    let doc = LessonDocument::from_value(sample()).unwrap();
    let out = serde_json::to_value(&doc).unwrap();
    assert_eq!(out["dialogue"]["vocabulary"][0]["level"], "7");
    assert_eq!(out["dialogue"]["vocabulary"][0]["partOfSpeech"], "Noun");
    assert_eq!(out["essay"]["grammar"], json!([]));
    assert_eq!(out["essay"]["references"], json!([]));
  }

  #[test]
  fn repairs_numeric_and_missing_vocab_levels() {
    let mut v = sample();
    v["dialogue"]["vocabulary"] = json!([
      { "word": "秘密", "level": 5 },
      { "word": "晶片", "level": 0 },
      { "word": "水田" },
      { "word": "矽島", "level": "无" },
      { "word": "", "level": 3 }
    ]);
    let doc = LessonDocument::from_value(v).unwrap();
    let levels: Vec<String> = doc.dialogue.vocabulary.iter().map(|e| e.level.token()).collect();
    assert_eq!(levels, vec!["5", "無", "無", "無"]);
    assert_eq!(doc.incomplete_vocab_count(), 4);
  }

  #[test]
  fn rejects_vocab_level_outside_token_set() {
    let mut v = sample();
    v["dialogue"]["vocabulary"][0]["level"] = json!("8");
    let err = LessonDocument::from_value(v).unwrap_err();
    assert!(err.contains("vocabulary level"), "{err}");

    let mut v = sample();
    v["dialogue"]["vocabulary"][0]["level"] = json!("HSK4");
    assert!(LessonDocument::from_value(v).is_err());
  }

  #[test]
  fn grammar_level_accepts_numeric_string_and_rejects_out_of_range() {
    let mut v = sample();
    v["dialogue"]["grammar"][0]["level"] = json!("3");
    let doc = LessonDocument::from_value(v).unwrap();
    assert_eq!(doc.dialogue.grammar[0].level, 3);

    let mut v = sample();
    v["dialogue"]["grammar"][0]["level"] = json!(0);
    assert!(LessonDocument::from_value(v).is_err());
  }

  #[test]
  fn rejects_both_dialogue_and_essay_content() {
    let mut v = sample();
    v["essay"]["paragraphs"] = json!(["當提到臺灣這個寶島時，您聯想起了什麼？"]);
    let err = LessonDocument::from_value(v).unwrap_err();
    assert!(err.contains("both"));
  }

  #[test]
  fn rejects_too_few_activities() {
    let mut v = sample();
    v["activities"] = json!([{ "title": "只有一個", "description": "x" }, { "title": "", "description": "" }]);
    let err = LessonDocument::from_value(v).unwrap_err();
    assert!(err.contains("activities"));
  }

  #[test]
  fn null_section_reads_as_empty() {
    let mut v = sample();
    v["essay"] = Value::Null;
    let doc = LessonDocument::from_value(v).unwrap();
    assert_eq!(doc.essay, Essay::default());
    assert_eq!(doc.dialogue.lines.len(), 1);

    let out = serde_json::to_value(&doc).unwrap();
    assert_eq!(out["essay"]["paragraphs"], json!([]));
    assert_eq!(out["essay"]["title"], "");
  }

  #[test]
  fn null_strings_and_arrays_read_as_empty() {
    let mut v = sample();
    v["essay"]["title"] = Value::Null;
    v["dialogue"]["title"] = Value::Null;
    v["dialogue"]["grammar"] = Value::Null;
    v["dialogue"]["vocabulary"][0]["korean"] = Value::Null;
    v["dialogue"]["vocabulary"][0]["level"] = Value::Null;
    v["activities"][0]["description"] = Value::Null;
    let doc = LessonDocument::from_value(v).unwrap();
    assert_eq!(doc.essay.title, "");
    assert_eq!(doc.dialogue.title, "");
    assert!(doc.dialogue.grammar.is_empty());
    assert_eq!(doc.dialogue.vocabulary[0].korean, "");
    assert_eq!(doc.dialogue.vocabulary[0].level, VocabLevel::Unlisted);
    assert_eq!(doc.activities[0].description, "");
    assert_eq!(doc.incomplete_vocab_count(), 1);
  }

  #[test]
  fn null_activities_or_main_level_still_fail_the_rules() {
    let mut v = sample();
    v["activities"] = Value::Null;
    let err = LessonDocument::from_value(v).unwrap_err();
    assert!(err.contains("activities"), "{err}");

    let mut v = sample();
    v["main_level"] = Value::Null;
    let err = LessonDocument::from_value(v).unwrap_err();
    assert!(err.contains("main_level"), "{err}");
  }

  #[test]
  fn rejects_missing_sections_and_empty_main_level() {
    let mut v = sample();
    v.as_object_mut().unwrap().remove("essay");
    assert!(LessonDocument::from_value(v).is_err());

    let mut v = sample();
    v["main_level"] = json!("   ");
    assert!(LessonDocument::from_value(v).is_err());

    assert!(LessonDocument::from_value(json!([1, 2, 3])).is_err());
  }
}
