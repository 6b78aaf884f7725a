use std::sync::Arc;

use form_core::{
  append_repeat_index_to_last_segment, build_index, create_single_item_path, decode_path_token,
  encode_path_token, existing_repeat_id, extend_item_path, hydrate_repeat_answers, hydrate_repeat_instances,
  item_path_to_locator_string, match_slots, merge_repeats, merge_single, resolve_column_widths, resolve_path,
  response_item_map, Answer, ColumnWidthSpec, FormError, ItemContainer, ItemPath, ItemType, Questionnaire,
  QuestionnaireResponse, RepeatInstanceList, RepeatUpdate, ResponseNode, SchemaItem, SequentialIdGenerator, Slot,
};
use serde_json::json;

fn init_logs() {
  let _ = env_logger::builder().is_test(true).try_init();
}

fn schema() -> Vec<SchemaItem> {
  vec![
    SchemaItem::new("name", ItemType::String),
    SchemaItem::new("contacts", ItemType::Group).repeating().with_children(vec![
      SchemaItem::new("phone", ItemType::String),
      SchemaItem::new("kind", ItemType::Choice),
    ]),
    SchemaItem::new("notes", ItemType::Text),
    SchemaItem::new("allergies", ItemType::String).repeating(),
  ]
}

fn answered(link_id: &str, value: &str) -> ResponseNode {
  ResponseNode::new(link_id).with_answer(Answer::string(value))
}

fn contact(phone: &str) -> ResponseNode {
  ResponseNode::new("contacts").with_children(vec![answered("phone", phone)])
}

fn link_ids(nodes: &[ResponseNode]) -> Vec<&str> {
  nodes.iter().map(|n| n.link_id.as_str()).collect()
}

#[test]
fn index_maps_link_ids_to_sibling_positions() {
  let index = build_index(&schema());
  assert_eq!(index.len(), 4);
  assert_eq!(index.position("name"), Some(0));
  assert_eq!(index.position("allergies"), Some(3));
  assert_eq!(index.position("phone"), None);
  assert!(build_index(&[]).is_empty());
}

#[test]
fn slots_follow_schema_order_and_classify_repeats() {
  init_logs();
  let schema = schema();
  let index = build_index(&schema);
  let response = vec![
    answered("allergies", "pollen"),
    answered("notes", "n"),
    contact("1"),
    answered("allergies", "dust"),
    contact("2"),
  ];

  let slots = match_slots(&schema, &response, &index);
  assert_eq!(slots.len(), 4);
  assert_eq!(slots[0], Slot::Empty);
  assert_eq!(slots[1].as_list().map(|l| l.len()), Some(2));
  assert_eq!(slots[2].as_single().map(|n| n.link_id.as_str()), Some("notes"));
  let allergies = slots[3].as_list().unwrap();
  assert_eq!(allergies[0].answer.as_ref().unwrap()[0].value_string(), Some("pollen"));
  assert_eq!(allergies[1].answer.as_ref().unwrap()[0].value_string(), Some("dust"));
}

#[test]
fn unanswered_repeating_item_is_an_empty_list_not_empty_slot() {
  let schema = schema();
  let slots = match_slots(&schema, &[], &build_index(&schema));
  assert_eq!(slots[1], Slot::List(vec![]));
  assert_eq!(slots[3], Slot::List(vec![]));
  assert!(slots.iter().all(Slot::is_empty));
}

#[test]
fn response_items_without_schema_position_are_ignored() {
  init_logs();
  let schema = schema();
  let slots = match_slots(&schema, &[answered("ghost", "x"), answered("name", "a")], &build_index(&schema));
  assert_eq!(slots[0].as_single().map(|n| n.link_id.as_str()), Some("name"));
  assert_eq!(slots.len(), 4);
}

// Duplicate nodes for a non-repeating item are malformed input. Keeping the
// last one is a defensive default rather than a documented contract; this
// test pins the current behavior so a change is noticed.
#[test]
fn duplicate_single_match_is_last_write_wins_defensive_default() {
  init_logs();
  let schema = schema();
  let slots = match_slots(
    &schema,
    &[answered("name", "first"), answered("name", "second")],
    &build_index(&schema),
  );
  let node = slots[0].as_single().unwrap();
  assert_eq!(node.answer.as_ref().unwrap()[0].value_string(), Some("second"));
}

#[test]
fn merge_single_inserts_at_schema_position() {
  let schema = schema();
  let index = build_index(&schema);
  let mut parent = QuestionnaireResponse::new(None).with_items(vec![answered("notes", "n")]);

  merge_single(answered("name", "Ada"), &mut parent, &index);
  assert_eq!(link_ids(parent.children()), vec!["name", "notes"]);

  merge_single(answered("allergies", "x"), &mut parent, &index);
  assert_eq!(link_ids(parent.children()), vec!["name", "notes", "allergies"]);
}

#[test]
fn merge_single_replaces_existing_node_in_place() {
  let schema = schema();
  let index = build_index(&schema);
  let mut parent = vec![answered("name", "old"), contact("1"), answered("notes", "n")];

  merge_single(answered("name", "new"), &mut parent, &index);
  assert_eq!(link_ids(&parent), vec!["name", "contacts", "notes"]);
  assert_eq!(parent[0].answer.as_ref().unwrap()[0].value_string(), Some("new"));
}

#[test]
fn merge_single_without_content_removes_the_node() {
  let schema = schema();
  let index = build_index(&schema);
  let mut parent = vec![answered("name", "old"), answered("notes", "n")];

  merge_single(ResponseNode::new("name"), &mut parent, &index);
  assert_eq!(link_ids(&parent), vec!["notes"]);
}

#[test]
fn merge_single_ignores_link_ids_outside_the_group() {
  init_logs();
  let schema = schema();
  let index = build_index(&schema);
  let mut parent = vec![answered("notes", "n")];
  merge_single(answered("phone", "1"), &mut parent, &index);
  assert_eq!(link_ids(&parent), vec!["notes"]);
}

#[test]
fn merge_repeats_with_no_instances_removes_only_that_item() {
  let schema = schema();
  let index = build_index(&schema);
  let mut parent = vec![answered("name", "a"), contact("1"), contact("2"), answered("notes", "n")];

  merge_repeats(RepeatUpdate::new("contacts", vec![]), &mut parent, &index);
  assert_eq!(link_ids(&parent), vec!["name", "notes"]);
}

#[test]
fn merge_repeats_places_instances_at_schema_position() {
  let schema = schema();
  let index = build_index(&schema);
  let mut parent = vec![answered("notes", "n"), answered("name", "a")];

  merge_repeats(
    RepeatUpdate::new("contacts", vec![contact("1"), ResponseNode::new("contacts"), contact("2")]),
    &mut parent,
    &index,
  );
  // "name" is out of schema order but keeps its place relative to "notes".
  assert_eq!(link_ids(&parent), vec!["contacts", "contacts", "notes", "name"]);
}

#[test]
fn merge_then_match_preserves_schema_order_for_any_response_order() {
  let schema = schema();
  let index = build_index(&schema);
  let base = [answered("notes", "n"), answered("allergies", "x"), answered("name", "a")];
  let orders: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

  for order in orders {
    let mut parent: Vec<ResponseNode> = order.iter().map(|&i| base[i].clone()).collect();
    merge_repeats(RepeatUpdate::new("contacts", vec![contact("9")]), &mut parent, &index);
    merge_single(answered("name", "b"), &mut parent, &index);

    let slots = match_slots(&schema, &parent, &index);
    let shape: Vec<&str> = slots
      .iter()
      .map(|s| match s {
        Slot::Empty => "empty",
        Slot::Single(n) => n.link_id.as_str(),
        Slot::List(nodes) => nodes.first().map(|n| n.link_id.as_str()).unwrap_or("list"),
      })
      .collect();
    assert_eq!(shape, vec!["name", "contacts", "notes", "allergies"], "order {order:?}");
  }
}

#[test]
fn locator_string_renders_repeat_indexes() {
  let path = extend_item_path(
    &extend_item_path(&create_single_item_path("groupA", None), "repeatingGroup", Some(1)),
    "questionB",
    None,
  );
  assert_eq!(
    item_path_to_locator_string(&path),
    "item.where(linkId='groupA').item.where(linkId='repeatingGroup')[1].item.where(linkId='questionB')"
  );
  assert_eq!(item_path_to_locator_string(&ItemPath::root()), "");
}

#[test]
fn extending_a_path_leaves_the_original_untouched() {
  let base = create_single_item_path("a", None);
  let first = extend_item_path(&base, "b", Some(2));
  let second = extend_item_path(&base, "b", Some(2));
  assert_eq!(base.len(), 1);
  assert_eq!(first, second);
  assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn repeat_index_on_empty_path_is_a_no_op() {
  for n in [0, 1, 7] {
    assert!(append_repeat_index_to_last_segment(&ItemPath::root(), n).is_empty());
  }
  let path = append_repeat_index_to_last_segment(&extend_item_path(&create_single_item_path("a", None), "b", None), 3);
  assert_eq!(path.segments()[0].repeat_index, None);
  assert_eq!(path.last().unwrap().repeat_index, Some(3));
}

#[test]
fn path_tokens_survive_transport_and_reject_garbage() {
  let path = extend_item_path(&create_single_item_path("contacts", Some(1)), "phone", None);
  let token = encode_path_token(&path).unwrap();
  assert!(!token.contains('/') && !token.contains('+'));
  assert_eq!(decode_path_token(Some(&token)).unwrap(), path);
  assert!(decode_path_token(None).unwrap().is_empty());
  assert!(matches!(decode_path_token(Some("%%%")), Err(FormError::BadPathToken(_))));
}

#[test]
fn resolve_path_counts_repeat_index_among_same_link_id_siblings() {
  let response = QuestionnaireResponse::new(None).with_items(vec![
    answered("name", "a"),
    contact("1"),
    contact("2"),
  ]);
  let path = extend_item_path(&create_single_item_path("contacts", Some(1)), "phone", None);
  let node = resolve_path(&response, &path).unwrap();
  assert_eq!(node.answer.as_ref().unwrap()[0].value_string(), Some("2"));
  assert!(resolve_path(&response, &create_single_item_path("contacts", Some(2))).is_none());
}

#[test]
fn hydrated_repeat_ids_are_deterministic() {
  let ids = SequentialIdGenerator::new("n");
  let nodes = vec![contact("1"), contact("2")];
  let first = hydrate_repeat_instances("contacts", &nodes, &ids);
  let second = hydrate_repeat_instances("contacts", &nodes, &ids);
  assert_eq!(first, second);
  assert_eq!(first[0].id, "contacts-repeat-000000");
  assert_eq!(first[1].id, existing_repeat_id("contacts", 1));
}

#[test]
fn empty_repeat_list_hydrates_to_one_blank_instance() {
  let ids = SequentialIdGenerator::new("n");
  let instances = hydrate_repeat_instances("contacts", &[], &ids);
  assert_eq!(instances.len(), 1);
  assert_eq!(instances[0].id, "contacts-repeat-n0");
  assert!(instances[0].node.is_none());
}

#[test]
fn repeat_answers_keep_existing_ids_and_fill_missing_ones() {
  let ids = SequentialIdGenerator::new("n");

  let blank = hydrate_repeat_answers("allergies", None, &ids);
  assert_eq!(blank.len(), 1);
  assert_eq!(blank[0].id.as_deref(), Some("allergies-repeat-n0"));
  assert!(blank[0].value.is_empty());

  let explicit_empty = ResponseNode {
    answer: Some(vec![]),
    ..ResponseNode::new("allergies")
  };
  assert!(hydrate_repeat_answers("allergies", Some(&explicit_empty), &ids).is_empty());

  let mut kept = Answer::string("dust");
  kept.id = Some("mine".into());
  let node = ResponseNode::new("allergies")
    .with_answer(Answer::string("pollen"))
    .with_answer(kept);
  let answers = hydrate_repeat_answers("allergies", Some(&node), &ids);
  assert_eq!(answers[0].id.as_deref(), Some("allergies-repeat-000000"));
  assert_eq!(answers[1].id.as_deref(), Some("mine"));
}

#[test]
fn repeat_list_edits_keep_identities_stable() {
  let ids = Arc::new(SequentialIdGenerator::new("n"));
  let mut list = RepeatInstanceList::hydrate("contacts", &[contact("1"), contact("2")], ids);
  let added = list.add_blank();
  assert_eq!(added, "contacts-repeat-n0");

  assert!(list.move_instance(2, 0));
  assert!(!list.move_instance(5, 0));
  let order: Vec<&str> = list.instances().iter().map(|r| r.id.as_str()).collect();
  assert_eq!(order, vec!["contacts-repeat-n0", "contacts-repeat-000000", "contacts-repeat-000001"]);

  assert!(list.remove("contacts-repeat-000000").is_some());
  assert!(list.set_node(&added, Some(contact("3"))));

  let update = list.to_update();
  assert_eq!(update.link_id, "contacts");
  let phones: Vec<_> = update
    .instances
    .iter()
    .map(|n| n.children()[0].answer.as_ref().unwrap()[0].value_string().unwrap().to_string())
    .collect();
  assert_eq!(phones, vec!["3", "2"]);
}

#[test]
fn response_item_map_covers_every_schema_link_id() {
  let questionnaire = Questionnaire::new(schema());
  let response = QuestionnaireResponse::new(None).with_items(vec![
    answered("name", "a"),
    contact("1"),
    contact("2"),
  ]);
  let map = response_item_map(&questionnaire, &response);

  assert_eq!(map.len(), 6);
  assert_eq!(map["contacts"].len(), 2);
  assert_eq!(map["phone"].len(), 2);
  assert!(map["kind"].is_empty());
  assert!(map["allergies"].is_empty());
}

#[test]
fn column_widths_split_remaining_space_across_unset_columns() {
  let widths = resolve_column_widths(
    &[ColumnWidthSpec::Unset, ColumnWidthSpec::Pixels(400.0), ColumnWidthSpec::Unset],
    1000.0,
  );
  let rendered: Vec<&str> = widths.iter().map(|w| w.width.as_str()).collect();
  assert_eq!(rendered, vec!["300px", "400px", "300px"]);
  assert!(widths.iter().all(|w| w.is_fixed));
}

#[test]
fn percentage_columns_keep_scaling() {
  let widths = resolve_column_widths(&[ColumnWidthSpec::Percent(25.0); 4], 1000.0);
  for w in &widths {
    assert_eq!(w.width, "25%");
    assert!(!w.is_fixed);
  }
}

#[test]
fn column_widths_conserve_the_container_when_declared_widths_fit() {
  let specs = [
    ColumnWidthSpec::Pixels(150.0),
    ColumnWidthSpec::Percent(20.0),
    ColumnWidthSpec::Unset,
    ColumnWidthSpec::Unset,
  ];
  for container in [400.0, 800.0, 1333.0] {
    let total: f64 = resolve_column_widths(&specs, container)
      .iter()
      .map(|w| w.pixels(container))
      .sum();
    assert!((total - container).abs() < 1e-6, "container {container}: {total}");
  }
}

#[test]
fn overflowing_columns_leave_unset_columns_at_zero() {
  let widths = resolve_column_widths(
    &[ColumnWidthSpec::Pixels(600.0), ColumnWidthSpec::Percent(50.0), ColumnWidthSpec::Unset],
    1000.0,
  );
  assert_eq!(widths[2].width, "0px");
  assert!(resolve_column_widths(&[ColumnWidthSpec::Pixels(10.0)], 100.0)[0].is_fixed);
}

#[test]
fn column_width_specs_parse_from_strings_and_extensions() {
  init_logs();
  assert_eq!(ColumnWidthSpec::parse(Some("400px")), ColumnWidthSpec::Pixels(400.0));
  assert_eq!(ColumnWidthSpec::parse(Some("25%")), ColumnWidthSpec::Percent(25.0));
  assert_eq!(ColumnWidthSpec::parse(Some("120")), ColumnWidthSpec::Pixels(120.0));
  assert_eq!(ColumnWidthSpec::parse(Some("wide")), ColumnWidthSpec::Unset);
  assert_eq!(ColumnWidthSpec::parse(Some("-5px")), ColumnWidthSpec::Unset);
  assert_eq!(ColumnWidthSpec::parse(None), ColumnWidthSpec::Unset);

  let mut item = SchemaItem::new("phone", ItemType::String);
  item.extension.push(json!({
    "url": "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-width",
    "valueQuantity": { "value": 30, "code": "%" }
  }));
  assert_eq!(ColumnWidthSpec::from_schema_item(&item), ColumnWidthSpec::Percent(30.0));
  assert_eq!(
    ColumnWidthSpec::from_schema_item(&SchemaItem::new("kind", ItemType::Choice)),
    ColumnWidthSpec::Unset
  );
}

#[test]
fn negative_width_extensions_are_treated_as_unset() {
  init_logs();
  let mut item = SchemaItem::new("phone", ItemType::String);
  item.extension.push(json!({
    "url": "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-width",
    "valueQuantity": { "value": -200, "code": "px" }
  }));
  let spec = ColumnWidthSpec::from_schema_item(&item);
  assert_eq!(spec, ColumnWidthSpec::Unset);

  // The unset column shares the container instead of inflating its siblings.
  let widths = resolve_column_widths(&[spec, ColumnWidthSpec::Unset], 600.0);
  let rendered: Vec<&str> = widths.iter().map(|w| w.width.as_str()).collect();
  assert_eq!(rendered, vec!["300px", "300px"]);
}

#[test]
fn documents_round_trip_through_fhir_json() {
  let raw = json!({
    "resourceType": "QuestionnaireResponse",
    "status": "in-progress",
    "item": [
      { "linkId": "name", "answer": [{ "valueString": "Ada" }] },
      { "linkId": "contacts", "item": [{ "linkId": "phone", "answer": [{ "id": "a1", "valueString": "1" }] }] }
    ]
  });
  let response: QuestionnaireResponse = serde_json::from_value(raw.clone()).unwrap();
  assert_eq!(response.children()[1].children()[0].answer.as_ref().unwrap()[0].id.as_deref(), Some("a1"));
  assert_eq!(serde_json::to_value(&response).unwrap(), raw);
}
