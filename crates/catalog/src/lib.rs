//! Product catalog domain module (event-sourced).
//!
//! Business rules for products and their sellable variants, implemented as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod product;

pub use product::{
    ActivateProduct, ArchiveProduct, ChangePrice, CreateProduct, DefineVariant, PriceChanged,
    Product, ProductActivated, ProductArchived, ProductCommand, ProductCreated, ProductEvent,
    ProductId, ProductStatus, Variant, VariantDefined,
};
