//! Built-in attempt presets

use crate::error::{EngineError, EngineResult};
use crate::spec::AttemptDefinition;

pub const PRESET_NAMES: &[&str] = &["smoke", "saas", "ecommerce"];

const SMOKE: &str = r#"
- id: landing
  goal: The landing page loads and shows a call to action
  category: UX
  steps:
    - action: navigate
      url: /
    - action: wait_for
      target: { label: primary navigation, selector: "nav, header" }
  validators:
    - type: element_visible
      target: { label: call to action, kind: button }
"#;

const SAAS: &str = r#"
- id: landing
  goal: The landing page loads and shows a call to action
  category: UX
  critical: false
  steps:
    - action: navigate
      url: /
    - action: wait_for
      target: { label: primary navigation, selector: "nav, header" }
- id: signup
  goal: A visitor can start creating an account
  category: LEAD
  requires: { label: sign up, kind: link }
  steps:
    - action: navigate
      url: /
    - action: interact
      target: { label: sign up, kind: link }
    - action: fill
      target: { label: email, kind: input, input_type: email }
      value: launchgate-probe@example.com
  success:
    - type: any_of
      conditions:
        - type: url_contains
          value: signup
        - type: url_contains
          value: register
        - type: element_visible
          target: { label: password, kind: input, input_type: password }
- id: pricing
  goal: A visitor can see pricing
  category: REVENUE
  critical: false
  requires: { label: pricing, kind: link }
  steps:
    - action: navigate
      url: /
    - action: interact
      target: { label: pricing, kind: link }
  success:
    - type: url_contains
      value: pricing
- id: login
  goal: A returning user can reach the login form
  category: TRUST
  critical: false
  requires: { label: log in, kind: link }
  steps:
    - action: navigate
      url: /
    - action: interact
      target: { label: log in, kind: link }
    - action: wait_for
      target: { label: password, kind: input, input_type: password }
"#;

const ECOMMERCE: &str = r#"
- id: landing
  goal: The storefront loads
  category: UX
  critical: false
  steps:
    - action: navigate
      url: /
    - action: wait_for
      target: { label: primary navigation, selector: "nav, header" }
- id: add_to_cart
  goal: A visitor can put a product in the cart
  category: REVENUE
  requires: { label: add to cart, kind: button }
  steps:
    - action: navigate
      url: /
    - action: interact
      target: { label: add to cart, kind: button }
  success:
    - type: any_of
      conditions:
        - type: text_present
          text: Added to cart
        - type: url_contains
          value: cart
- id: checkout
  goal: A visitor can reach checkout
  category: REVENUE
  requires: { label: checkout, kind: link }
  steps:
    - action: navigate
      url: /cart
    - action: interact
      target: { label: checkout, kind: any }
  success:
    - type: url_contains
      value: checkout
  validators:
    - type: element_visible
      target: { label: email, kind: input, input_type: email }
"#;

/// Attempts for a named preset
pub fn preset(name: &str) -> EngineResult<Vec<AttemptDefinition>> {
    let yaml = match name {
        "smoke" => SMOKE,
        "saas" => SAAS,
        "ecommerce" => ECOMMERCE,
        other => return Err(EngineError::UnknownPreset(other.to_string())),
    };
    AttemptDefinition::from_yaml(yaml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ensure_unique_ids;

    #[test]
    fn test_all_presets_parse() {
        for name in PRESET_NAMES {
            let attempts = preset(name).unwrap();
            assert!(!attempts.is_empty(), "{} is empty", name);
            ensure_unique_ids(&attempts).unwrap();
        }
    }

    #[test]
    fn test_preset_shapes() {
        let saas = preset("saas").unwrap();
        let signup = saas.iter().find(|a| a.id == "signup").unwrap();
        assert!(signup.critical);
        assert!(signup.requires.is_some());

        let shop = preset("ecommerce").unwrap();
        let critical: Vec<_> = shop.iter().filter(|a| a.critical).map(|a| a.id.as_str()).collect();
        assert_eq!(critical, vec!["add_to_cart", "checkout"]);
    }

    #[test]
    fn test_unknown_preset() {
        assert!(matches!(preset("blog"), Err(EngineError::UnknownPreset(_))));
    }
}
