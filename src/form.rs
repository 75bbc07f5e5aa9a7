/// A value paired with the label shown for it in pickers.
///
/// Two labeled values are equal when their values are equal, whatever the labels say.
#[derive(Debug, Clone)]
pub struct LabeledValue<V> {
  pub value: V,
  pub label: String,
}

impl<V> LabeledValue<V> {
  pub fn new(value: V, label: impl Into<String>) -> Self {
    Self {
      value,
      label: label.into(),
    }
  }
}

impl<V: PartialEq> PartialEq for LabeledValue<V> {
  fn eq(&self, other: &Self) -> bool {
    self.value == other.value
  }
}

impl<V: Eq> Eq for LabeledValue<V> {}

impl<V> std::fmt::Display for LabeledValue<V> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.label)
  }
}

/// Find the choice holding `value`.
pub fn find_choice<'a, V: PartialEq>(
  choices: &'a [LabeledValue<V>],
  value: &V,
) -> Option<&'a LabeledValue<V>> {
  choices.iter().find(|choice| choice.value == *value)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_equality_ignores_label() {
    assert_eq!(LabeledValue::new(1, "one"), LabeledValue::new(1, "uno"));
    assert_ne!(LabeledValue::new(1, "one"), LabeledValue::new(2, "one"));
  }

  #[test]
  fn test_display_uses_label() {
    assert_eq!(LabeledValue::new(3, "three").to_string(), "three");
  }

  #[test]
  fn test_find_choice() {
    let choices = vec![LabeledValue::new('a', "Alpha"), LabeledValue::new('b', "Beta")];
    assert_eq!(find_choice(&choices, &'b').map(|c| c.label.as_str()), Some("Beta"));
    assert!(find_choice(&choices, &'z').is_none());
  }
}
