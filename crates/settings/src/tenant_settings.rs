use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use stockpile_events::Event;

/// Settings stream identifier (derived from the tenant id by the caller).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantSettingsId(pub AggregateId);

impl TenantSettingsId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Deterministic singleton id: the settings stream reuses the tenant's
    /// own UUID as its aggregate id.
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self(AggregateId::from_uuid(*tenant_id.as_uuid()))
    }
}

impl core::fmt::Display for TenantSettingsId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: TenantSettings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSettings {
    id: TenantSettingsId,
    tenant_id: Option<TenantId>,
    currency: String,
    /// Default reorder point applied when a stock item has none configured.
    low_stock_default: i64,
    allow_backorders: bool,
    version: u64,
    created: bool,
}

impl TenantSettings {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: TenantSettingsId) -> Self {
        Self {
            id,
            tenant_id: None,
            currency: String::new(),
            low_stock_default: 0,
            allow_backorders: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TenantSettingsId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn low_stock_default(&self) -> i64 {
        self.low_stock_default
    }

    pub fn allow_backorders(&self) -> bool {
        self.allow_backorders
    }

    pub fn is_initialized(&self) -> bool {
        self.created
    }

    fn validate_currency(currency: &str) -> Result<String, DomainError> {
        let code = currency.trim().to_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(
                "currency must be a 3-letter ISO-4217 code",
            ));
        }
        Ok(code)
    }
}

impl AggregateRoot for TenantSettings {
    type Id = TenantSettingsId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: InitializeSettings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeSettings {
    pub tenant_id: TenantId,
    pub settings_id: TenantSettingsId,
    pub currency: String,
    pub low_stock_default: i64,
    pub allow_backorders: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateSettings (partial; at least one field must be set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettings {
    pub tenant_id: TenantId,
    pub settings_id: TenantSettingsId,
    pub low_stock_default: Option<i64>,
    pub allow_backorders: Option<bool>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeCurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCurrency {
    pub tenant_id: TenantId,
    pub settings_id: TenantSettingsId,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsCommand {
    InitializeSettings(InitializeSettings),
    UpdateSettings(UpdateSettings),
    ChangeCurrency(ChangeCurrency),
}

/// Event: SettingsInitialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsInitialized {
    pub tenant_id: TenantId,
    pub settings_id: TenantSettingsId,
    pub currency: String,
    pub low_stock_default: i64,
    pub allow_backorders: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettingsUpdated (carries the resulting values).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdated {
    pub tenant_id: TenantId,
    pub settings_id: TenantSettingsId,
    pub low_stock_default: i64,
    pub allow_backorders: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CurrencyChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyChanged {
    pub tenant_id: TenantId,
    pub settings_id: TenantSettingsId,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsEvent {
    SettingsInitialized(SettingsInitialized),
    SettingsUpdated(SettingsUpdated),
    CurrencyChanged(CurrencyChanged),
}

impl Event for SettingsEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SettingsEvent::SettingsInitialized(_) => "settings.tenant.initialized",
            SettingsEvent::SettingsUpdated(_) => "settings.tenant.updated",
            SettingsEvent::CurrencyChanged(_) => "settings.tenant.currency_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SettingsEvent::SettingsInitialized(e) => e.occurred_at,
            SettingsEvent::SettingsUpdated(e) => e.occurred_at,
            SettingsEvent::CurrencyChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for TenantSettings {
    type Command = SettingsCommand;
    type Event = SettingsEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SettingsEvent::SettingsInitialized(e) => {
                self.id = e.settings_id;
                self.tenant_id = Some(e.tenant_id);
                self.currency = e.currency.clone();
                self.low_stock_default = e.low_stock_default;
                self.allow_backorders = e.allow_backorders;
                self.created = true;
            }
            SettingsEvent::SettingsUpdated(e) => {
                self.low_stock_default = e.low_stock_default;
                self.allow_backorders = e.allow_backorders;
            }
            SettingsEvent::CurrencyChanged(e) => {
                self.currency = e.currency.clone();
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SettingsCommand::InitializeSettings(cmd) => self.handle_initialize(cmd),
            SettingsCommand::UpdateSettings(cmd) => self.handle_update(cmd),
            SettingsCommand::ChangeCurrency(cmd) => self.handle_change_currency(cmd),
        }
    }
}

impl TenantSettings {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_initialize(
        &self,
        cmd: &InitializeSettings,
    ) -> Result<Vec<SettingsEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("settings already initialized"));
        }
        if cmd.low_stock_default < 0 {
            return Err(DomainError::validation(
                "low stock default cannot be negative",
            ));
        }
        let currency = Self::validate_currency(&cmd.currency)?;

        Ok(vec![SettingsEvent::SettingsInitialized(SettingsInitialized {
            tenant_id: cmd.tenant_id,
            settings_id: cmd.settings_id,
            currency,
            low_stock_default: cmd.low_stock_default,
            allow_backorders: cmd.allow_backorders,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateSettings) -> Result<Vec<SettingsEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        if cmd.low_stock_default.is_none() && cmd.allow_backorders.is_none() {
            return Err(DomainError::validation("nothing to update"));
        }
        let low_stock_default = cmd.low_stock_default.unwrap_or(self.low_stock_default);
        if low_stock_default < 0 {
            return Err(DomainError::validation(
                "low stock default cannot be negative",
            ));
        }

        Ok(vec![SettingsEvent::SettingsUpdated(SettingsUpdated {
            tenant_id: cmd.tenant_id,
            settings_id: cmd.settings_id,
            low_stock_default,
            allow_backorders: cmd.allow_backorders.unwrap_or(self.allow_backorders),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_currency(
        &self,
        cmd: &ChangeCurrency,
    ) -> Result<Vec<SettingsEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        let currency = Self::validate_currency(&cmd.currency)?;
        if currency == self.currency {
            return Err(DomainError::invariant("currency unchanged"));
        }

        Ok(vec![SettingsEvent::CurrencyChanged(CurrencyChanged {
            tenant_id: cmd.tenant_id,
            settings_id: cmd.settings_id,
            currency,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpile_events::execute;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn initialized(tenant_id: TenantId) -> TenantSettings {
        let settings_id = TenantSettingsId::for_tenant(tenant_id);
        let mut settings = TenantSettings::empty(settings_id);
        execute(
            &mut settings,
            &SettingsCommand::InitializeSettings(InitializeSettings {
                tenant_id,
                settings_id,
                currency: "usd".to_string(),
                low_stock_default: 5,
                allow_backorders: false,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        settings
    }

    #[test]
    fn settings_id_is_deterministic_per_tenant() {
        let tenant_id = TenantId::new();
        assert_eq!(
            TenantSettingsId::for_tenant(tenant_id),
            TenantSettingsId::for_tenant(tenant_id)
        );
    }

    #[test]
    fn initialize_normalizes_currency() {
        let settings = initialized(TenantId::new());
        assert_eq!(settings.currency(), "USD");
        assert_eq!(settings.low_stock_default(), 5);
    }

    #[test]
    fn double_initialize_conflicts() {
        let tenant_id = TenantId::new();
        let settings = initialized(tenant_id);
        let settings_id = settings.id_typed();

        assert!(matches!(
            settings.handle(&SettingsCommand::InitializeSettings(InitializeSettings {
                tenant_id,
                settings_id,
                currency: "EUR".to_string(),
                low_stock_default: 0,
                allow_backorders: true,
                occurred_at: test_time(),
            })),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn invalid_currency_is_rejected() {
        let tenant_id = TenantId::new();
        let settings_id = TenantSettingsId::for_tenant(tenant_id);
        let settings = TenantSettings::empty(settings_id);

        for bad in ["US", "USDD", "U1D", ""] {
            assert!(settings
                .handle(&SettingsCommand::InitializeSettings(InitializeSettings {
                    tenant_id,
                    settings_id,
                    currency: bad.to_string(),
                    low_stock_default: 0,
                    allow_backorders: false,
                    occurred_at: test_time(),
                }))
                .is_err());
        }
    }

    #[test]
    fn partial_update_keeps_other_fields() {
        let tenant_id = TenantId::new();
        let mut settings = initialized(tenant_id);
        let settings_id = settings.id_typed();

        execute(
            &mut settings,
            &SettingsCommand::UpdateSettings(UpdateSettings {
                tenant_id,
                settings_id,
                low_stock_default: None,
                allow_backorders: Some(true),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(settings.low_stock_default(), 5);
        assert!(settings.allow_backorders());
    }

    #[test]
    fn empty_update_is_rejected() {
        let tenant_id = TenantId::new();
        let settings = initialized(tenant_id);
        let settings_id = settings.id_typed();

        assert!(settings
            .handle(&SettingsCommand::UpdateSettings(UpdateSettings {
                tenant_id,
                settings_id,
                low_stock_default: None,
                allow_backorders: None,
                occurred_at: test_time(),
            }))
            .is_err());
    }

    #[test]
    fn currency_change_must_differ() {
        let tenant_id = TenantId::new();
        let mut settings = initialized(tenant_id);
        let settings_id = settings.id_typed();

        assert!(settings
            .handle(&SettingsCommand::ChangeCurrency(ChangeCurrency {
                tenant_id,
                settings_id,
                currency: "usd".to_string(),
                occurred_at: test_time(),
            }))
            .is_err());

        execute(
            &mut settings,
            &SettingsCommand::ChangeCurrency(ChangeCurrency {
                tenant_id,
                settings_id,
                currency: "eur".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(settings.currency(), "EUR");
    }
}
