//! The collaborator bundle every pipeline component is built from.

use std::sync::Arc;

use simmer_core::{
  ports::{CaptionClient, CreditLedger, GenerationClient},
  store::RecipeStore,
};

/// Names the concrete collaborator types a deployment wires together.
///
/// Implemented by a zero-sized marker type, so components can be generic over
/// one parameter instead of four.
pub trait Backend: Send + Sync + 'static {
  type Store: RecipeStore + 'static;
  type Ledger: CreditLedger + 'static;
  type Captions: CaptionClient + 'static;
  type Generator: GenerationClient + 'static;
}

/// Shared handles to the collaborators of a [`Backend`].
pub struct Services<B: Backend> {
  pub store:     Arc<B::Store>,
  pub ledger:    Arc<B::Ledger>,
  pub captions:  Arc<B::Captions>,
  pub generator: Arc<B::Generator>,
}

impl<B: Backend> Services<B> {
  pub fn new(
    store: Arc<B::Store>,
    ledger: Arc<B::Ledger>,
    captions: Arc<B::Captions>,
    generator: Arc<B::Generator>,
  ) -> Self {
    Self { store, ledger, captions, generator }
  }
}

// Derived `Clone` would require `B: Clone`.
impl<B: Backend> Clone for Services<B> {
  fn clone(&self) -> Self {
    Self {
      store:     Arc::clone(&self.store),
      ledger:    Arc::clone(&self.ledger),
      captions:  Arc::clone(&self.captions),
      generator: Arc::clone(&self.generator),
    }
  }
}
