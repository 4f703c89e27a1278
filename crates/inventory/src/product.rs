use serde::{Deserialize, Serialize};

use blanketchain_core::{DomainError, DomainResult, ProductId};

/// Catalog product owned by the producer tier.
///
/// `stock` is the producer's on-hand quantity; it only changes through
/// producer-side transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub material: String,
    pub stock: i64,
    pub production_capacity: i64,
}

/// Registration request for a new catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub material: String,
    pub stock: i64,
    pub production_capacity: i64,
}

impl NewProduct {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if self.material.trim().is_empty() {
            return Err(DomainError::validation("material cannot be empty"));
        }
        if self.stock < 0 {
            return Err(DomainError::validation("stock cannot be negative"));
        }
        if self.production_capacity < 0 {
            return Err(DomainError::validation("production capacity cannot be negative"));
        }
        Ok(())
    }

    /// Materialize the product once the store has assigned an id.
    pub fn into_product(self, id: ProductId) -> Product {
        Product {
            id,
            name: self.name.trim().to_string(),
            material: self.material.trim().to_string(),
            stock: self.stock,
            production_capacity: self.production_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blanket() -> NewProduct {
        NewProduct {
            name: "Wool Classic".to_string(),
            material: "wool".to_string(),
            stock: 100,
            production_capacity: 500,
        }
    }

    #[test]
    fn valid_product_passes() {
        assert!(blanket().validate().is_ok());
    }

    #[test]
    fn blank_name_is_rejected() {
        let mut p = blanket();
        p.name = "  ".to_string();
        assert!(matches!(p.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn negative_stock_is_rejected() {
        let mut p = blanket();
        p.stock = -1;
        assert!(matches!(p.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn into_product_trims_text_fields() {
        let mut p = blanket();
        p.name = " Wool Classic ".to_string();
        let product = p.into_product(ProductId::new(7));
        assert_eq!(product.id, ProductId::new(7));
        assert_eq!(product.name, "Wool Classic");
        assert_eq!(product.stock, 100);
    }
}
