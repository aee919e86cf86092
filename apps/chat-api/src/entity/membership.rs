use super::ValidationError;

/// Avatar used when a member has not uploaded one.
pub const DEFAULT_PROFILE_IMAGE_URL: &str = "https://www.gravatar.com/avatar/?d=mp";

/// A user's profile within one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub user_id: String,
    pub workspace_id: String,
    pub name: String,
    pub profile_image_url: String,
    pub is_admin: bool,
}

impl Membership {
    pub fn new(
        user_id: impl Into<String>,
        workspace_id: impl Into<String>,
        name: impl Into<String>,
        profile_image_url: impl Into<String>,
        is_admin: bool,
    ) -> Result<Self, ValidationError> {
        let user_id = user_id.into();
        let workspace_id = workspace_id.into();
        let name = name.into();
        let mut profile_image_url = profile_image_url.into();

        if user_id.is_empty() {
            return Err(ValidationError::MissingField("user_id"));
        }
        if workspace_id.is_empty() {
            return Err(ValidationError::MissingField("workspace_id"));
        }
        if name.is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if profile_image_url.is_empty() {
            profile_image_url = DEFAULT_PROFILE_IMAGE_URL.to_string();
        }

        Ok(Self {
            user_id,
            workspace_id,
            name,
            profile_image_url,
            is_admin,
        })
    }
}
