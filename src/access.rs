use crate::db::{Project, Visibility};

/// Whether an actor may mutate a project.
///
/// Public projects are editable by any authenticated actor. Private projects
/// are editable only by their owner. Projects that predate the ownership
/// model carry no owner and stay editable by anyone. Reads are never gated.
pub fn can_mutate(project: &Project, actor_id: Option<&str>) -> bool {
    let Some(actor_id) = actor_id else {
        return false;
    };
    if project.visibility == Visibility::Public {
        return true;
    }
    match project.owner_id.as_deref() {
        None => true,
        Some(owner_id) => owner_id == actor_id,
    }
}

/// Whether the actor owns the project. Ownerless projects have no owner.
pub fn is_owner(project: &Project, actor_id: Option<&str>) -> bool {
    match (project.owner_id.as_deref(), actor_id) {
        (Some(owner_id), Some(actor_id)) => owner_id == actor_id,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(visibility: Visibility, owner_id: Option<&str>) -> Project {
        Project {
            id: "p1".to_string(),
            name: "demo".to_string(),
            description: None,
            base_language: "en-US".to_string(),
            target_languages: vec!["zh-CN".to_string()],
            visibility,
            owner_id: owner_id.map(str::to_string),
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
            updated_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_public_project_editable_by_anyone() {
        let p = project(Visibility::Public, Some("owner"));
        assert!(can_mutate(&p, Some("owner")));
        assert!(can_mutate(&p, Some("stranger")));
    }

    #[test]
    fn test_private_project_editable_only_by_owner() {
        let p = project(Visibility::Private, Some("owner"));
        assert!(can_mutate(&p, Some("owner")));
        assert!(!can_mutate(&p, Some("stranger")));
    }

    #[test]
    fn test_ownerless_private_project_treated_as_public() {
        let p = project(Visibility::Private, None);
        assert!(can_mutate(&p, Some("anyone")));
    }

    #[test]
    fn test_anonymous_actor_cannot_mutate() {
        assert!(!can_mutate(&project(Visibility::Public, None), None));
        assert!(!can_mutate(&project(Visibility::Private, Some("owner")), None));
    }

    #[test]
    fn test_is_owner() {
        let p = project(Visibility::Private, Some("owner"));
        assert!(is_owner(&p, Some("owner")));
        assert!(!is_owner(&p, Some("stranger")));
        assert!(!is_owner(&p, None));
        assert!(!is_owner(&project(Visibility::Public, None), Some("anyone")));
    }
}
