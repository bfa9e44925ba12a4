//! Variant source implementations

use std::cell::RefCell;
use std::rc::Rc;

use super::VariantSource;
use crate::error::PersonaError;
use crate::switcher::{VariantRequest, VariantResponse};

/// Variant source answering every request with a fixed response
#[derive(Debug, Clone, Default)]
pub struct StaticVariantSource {
    response: Option<VariantResponse>,
    requests: Rc<RefCell<Vec<VariantRequest>>>,
}

impl StaticVariantSource {
    pub fn new(response: VariantResponse) -> Self {
        Self {
            response: Some(response),
            requests: Rc::default(),
        }
    }

    /// Source with no variants for anyone
    pub fn empty() -> Self {
        Self::new(VariantResponse::default())
    }

    /// Source whose every fetch fails
    pub fn failing() -> Self {
        Self::default()
    }

    /// Parse a recorded variant API reply
    pub fn from_json(json: &str) -> Result<Self, PersonaError> {
        Ok(Self::new(VariantResponse::from_json(json)?))
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<VariantRequest> {
        self.requests.borrow().clone()
    }
}

impl VariantSource for StaticVariantSource {
    fn fetch(&mut self, request: &VariantRequest) -> Result<VariantResponse, PersonaError> {
        self.requests.borrow_mut().push(request.clone());
        self.response.clone().ok_or_else(|| {
            PersonaError::VariantFetchError(format!(
                "variant API unavailable for {}",
                request.query_string()
            ))
        })
    }
}
