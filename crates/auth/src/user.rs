//! Staff user aggregate (event-sourced).
//!
//! Users are tenant-scoped staff accounts carrying RBAC roles. Role grants
//! go through a privilege-escalation guard: an actor may only grant roles
//! it holds itself, unless it is an admin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use stockpile_events::Event;

use crate::Role;

/// Unique identifier for a user within a tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<AggregateId> for UserId {
    fn from(value: AggregateId) -> Self {
        Self(*value.as_uuid())
    }
}

impl From<UserId> for AggregateId {
    fn from(value: UserId) -> Self {
        AggregateId::from_uuid(value.0)
    }
}

/// User account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// User is active and can authenticate/transact.
    #[default]
    Active,
    /// User is suspended and cannot authenticate.
    Suspended,
}

/// Aggregate root: User.
///
/// Invariants:
/// - A user belongs to exactly one tenant (tenant_id is immutable after creation).
/// - Roles are tenant-scoped.
/// - Suspended users cannot be assigned new roles.
/// - Actors cannot grant roles they do not hold (admins excepted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    id: UserId,
    tenant_id: Option<TenantId>,
    email: String,
    display_name: String,
    roles: Vec<Role>,
    status: UserStatus,
    version: u64,
    created: bool,
}

impl User {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: UserId) -> Self {
        Self {
            id,
            tenant_id: None,
            email: String::new(),
            display_name: String::new(),
            roles: Vec::new(),
            status: UserStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> UserId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn status(&self) -> UserStatus {
        self.status
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r.as_str() == role.as_str())
    }
}

impl AggregateRoot for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateUser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    pub initial_roles: Vec<Role>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignRole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignRole {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    /// Roles of the actor performing this operation (escalation check).
    pub actor_roles: Vec<Role>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevokeRole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeRole {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SuspendUser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ActivateUser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserCommand {
    Create(CreateUser),
    AssignRole(AssignRole),
    RevokeRole(RevokeRole),
    Suspend(SuspendUser),
    Activate(ActivateUser),
}

/// Event: UserCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreated {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    pub initial_roles: Vec<Role>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RoleAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssigned {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RoleRevoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRevoked {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UserSuspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSuspended {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UserActivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActivated {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserEvent {
    Created(UserCreated),
    RoleAssigned(RoleAssigned),
    RoleRevoked(RoleRevoked),
    Suspended(UserSuspended),
    Activated(UserActivated),
}

impl Event for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Created(_) => "auth.user.created",
            UserEvent::RoleAssigned(_) => "auth.user.role_assigned",
            UserEvent::RoleRevoked(_) => "auth.user.role_revoked",
            UserEvent::Suspended(_) => "auth.user.suspended",
            UserEvent::Activated(_) => "auth.user.activated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::Created(e) => e.occurred_at,
            UserEvent::RoleAssigned(e) => e.occurred_at,
            UserEvent::RoleRevoked(e) => e.occurred_at,
            UserEvent::Suspended(e) => e.occurred_at,
            UserEvent::Activated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for User {
    type Command = UserCommand;
    type Event = UserEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            UserEvent::Created(e) => {
                self.id = e.user_id;
                self.tenant_id = Some(e.tenant_id);
                self.email = e.email.clone();
                self.display_name = e.display_name.clone();
                self.roles = e.initial_roles.clone();
                self.status = UserStatus::Active;
                self.created = true;
            }
            UserEvent::RoleAssigned(e) => {
                self.roles.push(e.role.clone());
            }
            UserEvent::RoleRevoked(e) => {
                self.roles.retain(|r| r.as_str() != e.role.as_str());
            }
            UserEvent::Suspended(_) => {
                self.status = UserStatus::Suspended;
            }
            UserEvent::Activated(_) => {
                self.status = UserStatus::Active;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            UserCommand::Create(cmd) => self.handle_create(cmd),
            UserCommand::AssignRole(cmd) => self.handle_assign_role(cmd),
            UserCommand::RevokeRole(cmd) => self.handle_revoke_role(cmd),
            UserCommand::Suspend(cmd) => self.handle_suspend(cmd),
            UserCommand::Activate(cmd) => self.handle_activate(cmd),
        }
    }
}

impl User {
    fn handle_create(&self, cmd: &CreateUser) -> Result<Vec<UserEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("user already exists"));
        }
        if cmd.email.trim().is_empty() || !cmd.email.contains('@') {
            return Err(DomainError::validation("invalid email format"));
        }
        if cmd.display_name.trim().is_empty() {
            return Err(DomainError::validation("display name cannot be empty"));
        }

        Ok(vec![UserEvent::Created(UserCreated {
            tenant_id: cmd.tenant_id,
            user_id: cmd.user_id,
            email: cmd.email.trim().to_lowercase(),
            display_name: cmd.display_name.trim().to_string(),
            initial_roles: cmd.initial_roles.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_role(&self, cmd: &AssignRole) -> Result<Vec<UserEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        if self.status == UserStatus::Suspended {
            return Err(DomainError::invariant("user is suspended"));
        }
        if self.has_role(&cmd.role) {
            return Err(DomainError::invariant("role already assigned"));
        }

        // Escalation guard: actor may only grant a role it holds, unless admin.
        let actor_is_admin = cmd.actor_roles.iter().any(|r| r.as_str() == "admin");
        let actor_has_role = cmd
            .actor_roles
            .iter()
            .any(|r| r.as_str() == cmd.role.as_str());
        if !actor_is_admin && !actor_has_role {
            return Err(DomainError::Unauthorized);
        }

        Ok(vec![UserEvent::RoleAssigned(RoleAssigned {
            tenant_id: cmd.tenant_id,
            user_id: cmd.user_id,
            role: cmd.role.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revoke_role(&self, cmd: &RevokeRole) -> Result<Vec<UserEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        if !self.has_role(&cmd.role) {
            return Err(DomainError::invariant("role not assigned"));
        }

        Ok(vec![UserEvent::RoleRevoked(RoleRevoked {
            tenant_id: cmd.tenant_id,
            user_id: cmd.user_id,
            role: cmd.role.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_suspend(&self, cmd: &SuspendUser) -> Result<Vec<UserEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        if self.status == UserStatus::Suspended {
            return Err(DomainError::invariant("user already suspended"));
        }

        Ok(vec![UserEvent::Suspended(UserSuspended {
            tenant_id: cmd.tenant_id,
            user_id: cmd.user_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateUser) -> Result<Vec<UserEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        if self.status == UserStatus::Active {
            return Err(DomainError::invariant("user already active"));
        }

        Ok(vec![UserEvent::Activated(UserActivated {
            tenant_id: cmd.tenant_id,
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_user(tenant_id: TenantId, user_id: UserId, roles: Vec<Role>) -> User {
        let mut user = User::empty(user_id);
        let cmd = UserCommand::Create(CreateUser {
            tenant_id,
            user_id,
            email: "staff@example.com".to_string(),
            display_name: "Staff Member".to_string(),
            initial_roles: roles,
            occurred_at: now(),
        });
        for event in user.handle(&cmd).unwrap() {
            user.apply(&event);
        }
        user
    }

    #[test]
    fn create_normalizes_email() {
        let user = User::empty(UserId::new());
        let cmd = UserCommand::Create(CreateUser {
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            email: "  Alice@Example.COM ".to_string(),
            display_name: "Alice".to_string(),
            initial_roles: vec![Role::new("cashier")],
            occurred_at: now(),
        });

        let events = user.handle(&cmd).unwrap();
        let UserEvent::Created(e) = &events[0] else {
            panic!("expected UserCreated event");
        };
        assert_eq!(e.email, "alice@example.com");
    }

    #[test]
    fn create_rejects_invalid_email() {
        let user = User::empty(UserId::new());
        let cmd = UserCommand::Create(CreateUser {
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            email: "not-an-email".to_string(),
            display_name: "Alice".to_string(),
            initial_roles: vec![],
            occurred_at: now(),
        });
        assert!(user.handle(&cmd).is_err());
    }

    #[test]
    fn escalation_is_blocked_for_non_admin_actor() {
        let tenant_id = TenantId::new();
        let user_id = UserId::new();
        let user = created_user(tenant_id, user_id, vec![]);

        let cmd = UserCommand::AssignRole(AssignRole {
            tenant_id,
            user_id,
            role: Role::new("admin"),
            actor_roles: vec![Role::new("cashier")],
            occurred_at: now(),
        });

        assert!(matches!(user.handle(&cmd), Err(DomainError::Unauthorized)));
    }

    #[test]
    fn admin_can_grant_any_role() {
        let tenant_id = TenantId::new();
        let user_id = UserId::new();
        let user = created_user(tenant_id, user_id, vec![]);

        let cmd = UserCommand::AssignRole(AssignRole {
            tenant_id,
            user_id,
            role: Role::new("warehouse"),
            actor_roles: vec![Role::new("admin")],
            occurred_at: now(),
        });

        let events = user.handle(&cmd).unwrap();
        assert!(matches!(&events[0], UserEvent::RoleAssigned(e) if e.role.as_str() == "warehouse"));
    }

    #[test]
    fn suspended_user_cannot_receive_roles() {
        let tenant_id = TenantId::new();
        let user_id = UserId::new();
        let mut user = created_user(tenant_id, user_id, vec![]);

        let suspend = UserCommand::Suspend(SuspendUser {
            tenant_id,
            user_id,
            reason: "policy".to_string(),
            occurred_at: now(),
        });
        for event in user.handle(&suspend).unwrap() {
            user.apply(&event);
        }
        assert_eq!(user.status(), UserStatus::Suspended);

        let assign = UserCommand::AssignRole(AssignRole {
            tenant_id,
            user_id,
            role: Role::new("manager"),
            actor_roles: vec![Role::new("admin")],
            occurred_at: now(),
        });
        assert!(user.handle(&assign).is_err());
    }

    #[test]
    fn cross_tenant_command_is_rejected() {
        let tenant_a = TenantId::new();
        let user_id = UserId::new();
        let user = created_user(tenant_a, user_id, vec![]);

        let cmd = UserCommand::Suspend(SuspendUser {
            tenant_id: TenantId::new(),
            user_id,
            reason: "test".to_string(),
            occurred_at: now(),
        });

        let err = user.handle(&cmd).unwrap_err();
        assert!(err.to_string().contains("tenant"));
    }

    #[test]
    fn suspend_then_activate_round_trip() {
        let tenant_id = TenantId::new();
        let user_id = UserId::new();
        let mut user = created_user(tenant_id, user_id, vec![Role::new("manager")]);

        let suspend = UserCommand::Suspend(SuspendUser {
            tenant_id,
            user_id,
            reason: "leave".to_string(),
            occurred_at: now(),
        });
        for event in user.handle(&suspend).unwrap() {
            user.apply(&event);
        }

        let activate = UserCommand::Activate(ActivateUser {
            tenant_id,
            user_id,
            occurred_at: now(),
        });
        for event in user.handle(&activate).unwrap() {
            user.apply(&event);
        }

        assert_eq!(user.status(), UserStatus::Active);
        assert_eq!(user.version(), 3);
    }

    #[test]
    fn revoke_removes_role() {
        let tenant_id = TenantId::new();
        let user_id = UserId::new();
        let mut user = created_user(tenant_id, user_id, vec![Role::new("warehouse")]);

        let revoke = UserCommand::RevokeRole(RevokeRole {
            tenant_id,
            user_id,
            role: Role::new("warehouse"),
            occurred_at: now(),
        });
        for event in user.handle(&revoke).unwrap() {
            user.apply(&event);
        }

        assert!(user.roles().is_empty());
    }
}
