/// Per-record-type permissions consulted by front ends before offering an action.
pub trait AccessPolicy {
    fn can_view(&self, type_name: &str) -> bool;

    fn can_create(&self, type_name: &str) -> bool;

    fn can_edit(&self, type_name: &str) -> bool;

    fn can_delete(&self, type_name: &str) -> bool;

    fn can_filter(&self, type_name: &str) -> bool;

    /// Import replaces every record, so it needs edit, create and delete rights together.
    fn can_import(&self, type_name: &str) -> bool {
        self.can_edit(type_name) && self.can_create(type_name) && self.can_delete(type_name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn can_view(&self, _type_name: &str) -> bool {
        true
    }

    fn can_create(&self, _type_name: &str) -> bool {
        true
    }

    fn can_edit(&self, _type_name: &str) -> bool {
        true
    }

    fn can_delete(&self, _type_name: &str) -> bool {
        true
    }

    fn can_filter(&self, _type_name: &str) -> bool {
        true
    }
}

/// View and filter only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnly;

impl AccessPolicy for ReadOnly {
    fn can_view(&self, _type_name: &str) -> bool {
        true
    }

    fn can_create(&self, _type_name: &str) -> bool {
        false
    }

    fn can_edit(&self, _type_name: &str) -> bool {
        false
    }

    fn can_delete(&self, _type_name: &str) -> bool {
        false
    }

    fn can_filter(&self, _type_name: &str) -> bool {
        true
    }
}

/// User confirmation and notification, injected so the engine never blocks on a UI.
pub trait Prompt {
    fn confirm(&self, title: &str, message: &str) -> bool;

    fn alert(&self, title: &str, message: &str);
}
