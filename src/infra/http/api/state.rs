use crate::application::content::ContentService;

#[derive(Clone)]
pub struct ApiState {
    pub content: ContentService,
}

impl ApiState {
    pub fn new(content: ContentService) -> Self {
        Self { content }
    }
}
