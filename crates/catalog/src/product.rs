use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId};
use stockpile_events::Event;

/// Product identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

/// A sellable variant of a product (e.g. size/colour).
///
/// Variants share the product's stock identity; they refine the SKU and may
/// shift the price by a delta in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub variant_no: u32,
    pub name: String,
    pub sku_suffix: String,
    /// Signed price delta in minor units relative to the base price.
    pub price_delta: i64,
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    tenant_id: Option<TenantId>,
    sku: String,
    name: String,
    price: Money,
    status: ProductStatus,
    variants: Vec<Variant>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            sku: String::new(),
            name: String::new(),
            price: Money::ZERO,
            status: ProductStatus::Draft,
            variants: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Whether the product can appear on a sales order line.
    pub fn can_be_sold(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ActivateProduct (Draft → Active).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveProduct (Active → Archived).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangePrice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePrice {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DefineVariant (not allowed once archived).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefineVariant {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub name: String,
    pub sku_suffix: String,
    pub price_delta: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    ActivateProduct(ActivateProduct),
    ArchiveProduct(ArchiveProduct),
    ChangePrice(ChangePrice),
    DefineVariant(DefineVariant),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductActivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductActivated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PriceChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChanged {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VariantDefined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDefined {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant: Variant,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductActivated(ProductActivated),
    ProductArchived(ProductArchived),
    PriceChanged(PriceChanged),
    VariantDefined(VariantDefined),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "catalog.product.created",
            ProductEvent::ProductActivated(_) => "catalog.product.activated",
            ProductEvent::ProductArchived(_) => "catalog.product.archived",
            ProductEvent::PriceChanged(_) => "catalog.product.price_changed",
            ProductEvent::VariantDefined(_) => "catalog.product.variant_defined",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductActivated(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
            ProductEvent::PriceChanged(e) => e.occurred_at,
            ProductEvent::VariantDefined(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.price = e.price;
                self.status = ProductStatus::Draft;
                self.variants.clear();
                self.created = true;
            }
            ProductEvent::ProductActivated(_) => {
                self.status = ProductStatus::Active;
            }
            ProductEvent::ProductArchived(_) => {
                self.status = ProductStatus::Archived;
            }
            ProductEvent::PriceChanged(e) => {
                self.price = e.price;
            }
            ProductEvent::VariantDefined(e) => {
                self.variants.push(e.variant.clone());
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::ActivateProduct(cmd) => self.handle_activate(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
            ProductCommand::ChangePrice(cmd) => self.handle_change_price(cmd),
            ProductCommand::DefineVariant(cmd) => self.handle_define_variant(cmd),
        }
    }
}

impl Product {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            sku: cmd.sku.trim().to_string(),
            name: cmd.name.trim().to_string(),
            price: cmd.price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if self.status != ProductStatus::Draft {
            return Err(DomainError::invariant("only draft products can be activated"));
        }
        if self.price.is_zero() {
            return Err(DomainError::validation(
                "cannot activate product without a price",
            ));
        }

        Ok(vec![ProductEvent::ProductActivated(ProductActivated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("product already archived"));
        }

        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_price(&self, cmd: &ChangePrice) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("cannot reprice archived product"));
        }
        if cmd.price.is_zero() {
            return Err(DomainError::validation("price must be positive"));
        }

        Ok(vec![ProductEvent::PriceChanged(PriceChanged {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            price: cmd.price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_define_variant(&self, cmd: &DefineVariant) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant(
                "cannot define variant on archived product",
            ));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("variant name cannot be empty"));
        }
        if cmd.sku_suffix.trim().is_empty() {
            return Err(DomainError::validation("variant sku suffix cannot be empty"));
        }
        if self
            .variants
            .iter()
            .any(|v| v.sku_suffix == cmd.sku_suffix.trim())
        {
            return Err(DomainError::conflict("variant sku suffix already defined"));
        }

        // Variant price may not go below zero.
        if cmd.price_delta < 0 && self.price.minor() < cmd.price_delta.unsigned_abs() {
            return Err(DomainError::validation(
                "variant price delta pushes price below zero",
            ));
        }

        let next_no = (self.variants.len() as u32) + 1;
        Ok(vec![ProductEvent::VariantDefined(VariantDefined {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            variant: Variant {
                variant_no: next_no,
                name: cmd.name.trim().to_string(),
                sku_suffix: cmd.sku_suffix.trim().to_string(),
                price_delta: cmd.price_delta,
            },
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_product(tenant_id: TenantId, product_id: ProductId, price: u64) -> Product {
        let mut product = Product::empty(product_id);
        let cmd = CreateProduct {
            tenant_id,
            product_id,
            sku: "TEE-001".to_string(),
            name: "Plain Tee".to_string(),
            price: Money::from_minor(price),
            occurred_at: test_time(),
        };
        let events = product
            .handle(&ProductCommand::CreateProduct(cmd))
            .unwrap();
        product.apply(&events[0]);
        product
    }

    #[test]
    fn create_product_emits_product_created_event() {
        let product = Product::empty(test_product_id());
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();

        let cmd = CreateProduct {
            tenant_id,
            product_id,
            sku: " TEE-001 ".to_string(),
            name: "Plain Tee".to_string(),
            price: Money::from_minor(1999),
            occurred_at: test_time(),
        };

        let events = product
            .handle(&ProductCommand::CreateProduct(cmd))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            ProductEvent::ProductCreated(e) => {
                assert_eq!(e.sku, "TEE-001");
                assert_eq!(e.price.minor(), 1999);
            }
            _ => panic!("Expected ProductCreated event"),
        }
    }

    #[test]
    fn cannot_activate_without_price() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let product = created_product(tenant_id, product_id, 0);

        let cmd = ActivateProduct {
            tenant_id,
            product_id,
            occurred_at: test_time(),
        };
        assert!(product
            .handle(&ProductCommand::ActivateProduct(cmd))
            .is_err());
    }

    #[test]
    fn lifecycle_draft_active_archived() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = created_product(tenant_id, product_id, 1999);
        assert_eq!(product.status(), ProductStatus::Draft);
        assert!(!product.can_be_sold());

        let events = product
            .handle(&ProductCommand::ActivateProduct(ActivateProduct {
                tenant_id,
                product_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        product.apply(&events[0]);
        assert!(product.can_be_sold());

        let events = product
            .handle(&ProductCommand::ArchiveProduct(ArchiveProduct {
                tenant_id,
                product_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        product.apply(&events[0]);
        assert_eq!(product.status(), ProductStatus::Archived);
        assert!(!product.can_be_sold());
    }

    #[test]
    fn cannot_reprice_archived_product() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = created_product(tenant_id, product_id, 1999);

        for cmd in [
            ProductCommand::ActivateProduct(ActivateProduct {
                tenant_id,
                product_id,
                occurred_at: test_time(),
            }),
            ProductCommand::ArchiveProduct(ArchiveProduct {
                tenant_id,
                product_id,
                occurred_at: test_time(),
            }),
        ] {
            let events = product.handle(&cmd).unwrap();
            product.apply(&events[0]);
        }

        let err = product
            .handle(&ProductCommand::ChangePrice(ChangePrice {
                tenant_id,
                product_id,
                price: Money::from_minor(999),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn variant_numbers_are_sequential_and_suffixes_unique() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = created_product(tenant_id, product_id, 1999);

        let define = |name: &str, suffix: &str| {
            ProductCommand::DefineVariant(DefineVariant {
                tenant_id,
                product_id,
                name: name.to_string(),
                sku_suffix: suffix.to_string(),
                price_delta: 0,
                occurred_at: test_time(),
            })
        };

        let events = product.handle(&define("Small", "S")).unwrap();
        product.apply(&events[0]);
        let events = product.handle(&define("Large", "L")).unwrap();
        product.apply(&events[0]);

        assert_eq!(product.variants()[0].variant_no, 1);
        assert_eq!(product.variants()[1].variant_no, 2);

        assert!(matches!(
            product.handle(&define("Also Small", "S")),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn negative_variant_delta_cannot_underflow_price() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let product = created_product(tenant_id, product_id, 500);

        let cmd = ProductCommand::DefineVariant(DefineVariant {
            tenant_id,
            product_id,
            name: "Clearance".to_string(),
            sku_suffix: "CL".to_string(),
            price_delta: -501,
            occurred_at: test_time(),
        });
        assert!(product.handle(&cmd).is_err());
    }
}
