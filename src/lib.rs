mod engine;
mod export;
mod index;
mod layout;
mod merge;
mod models;
mod path;
mod queue;
mod registry;
mod repeat;
mod storage;
mod store;

pub use crate::engine::{FormEngine, FormOptions};
pub use crate::export::prune_response;
pub use crate::index::{build_index, find_schema_item, match_slots, response_item_map, schema_children_at, SchemaIndex, Slot};
pub use crate::layout::{resolve_column_widths, ColumnWidthSpec, ResolvedColumnWidth};
pub use crate::merge::{empty_group, empty_item, merge_repeats, merge_single, RepeatUpdate};
pub use crate::models::{
  Answer, DraftInfo, ExportResult, ItemContainer, ItemPathSegment, ItemType, Questionnaire, QuestionnaireResponse,
  ResponseNode, ResponseStatus, SchemaContainer, SchemaItem, SessionInfo, UpdateReason,
};
pub use crate::path::{
  append_repeat_index_to_last_segment, create_single_item_path, decode_path_token, encode_path_token,
  extend_item_path, item_path_to_locator_string, resolve_path, ItemPath,
};
pub use crate::queue::{NoopRecompute, Publish, QueueStatus, Recompute, RecomputeError, UpdateQueue, UpdateTask};
pub use crate::registry::{BehaviorRegistry, DefaultBehavior, ItemBehavior};
pub use crate::repeat::{
  existing_repeat_id, hydrate_repeat_answers, hydrate_repeat_instances, new_repeat_id, IdGenerator, RepeatInstance,
  RepeatInstanceList, SequentialIdGenerator, UuidIdGenerator,
};
pub use crate::storage::{RecentQuestionnaire, Storage, StorageOptions};
pub use crate::store::{ResponseState, ResponseStore, SubscriptionId};

pub use crate::engine::FormError;
