use geochron_engine::{Task, TaskDefinition};
use pretty_assertions::assert_eq;

const DEFINITION: &str = r##"
{
  "name": "demo reduction",
  "normalize_ratio_uncertainties": false,
  "nominal_masses": ["196", "206", "238", "254"],
  "ratio_names": ["254/238", "206/238"],
  "constants": [
    { "name": "extPErr", "value": 0.75 }
  ],
  "expressions": [
    {
      "name": "UConc",
      "formula": "ln([\"254/238\"]) * extPErr"
    },
    {
      "name": "WtdUConc",
      "formula": "sqWtdAv([\"UConc\"])",
      "contexts": {
        "reference_materials": true,
        "unknowns": false,
        "summary": true,
        "concentration_reference_materials": false
      }
    }
  ]
}
"##;

#[test]
fn task_definitions_load_from_json() {
    let definition = TaskDefinition::from_json(DEFINITION).unwrap();
    assert_eq!(definition.name, "demo reduction");
    assert_eq!(definition.ratio_names.len(), 2);
    assert_eq!(definition.expressions[1].name, "WtdUConc");
    assert!(definition.expressions[1].contexts.summary);

    let task = Task::build(definition).unwrap();
    assert_eq!(task.is_expression_healthy("UConc"), Some(true));
    assert_eq!(task.is_expression_healthy("WtdUConc"), Some(true));
}

#[test]
fn definitions_round_trip_through_json() {
    let definition = TaskDefinition::from_json(DEFINITION).unwrap();
    let reparsed = TaskDefinition::from_json(&definition.to_json().unwrap()).unwrap();
    assert_eq!(definition, reparsed);
}
