use crate::application::Application;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Supplies the raw payload of a data source. Invoked once per fetch.
///
/// The result shape is up to the collaborator; turning it into the stored
/// value is the job of [`OnLoad`].
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, app: Application) -> anyhow::Result<Value>;
}

/// Transforms a loader payload into the value stored on the data source.
///
/// Returning `Ok(None)` keeps the data currently held by the source.
#[async_trait]
pub trait OnLoad<T: Send + 'static>: Send + Sync {
    async fn on_load(&self, app: Application, raw: Value) -> anyhow::Result<Option<T>>;
}

/// Hook run after a successful load, before subscribers are notified
pub type AfterLoad = Arc<dyn Fn(&Application) -> anyhow::Result<()> + Send + Sync>;

/// Adapts an async closure into a [`Loader`]
pub struct LoaderFn<F>(F);

/// Wrap `f` as a loader
pub fn loader_fn<F, Fut>(f: F) -> LoaderFn<F>
where
    F: Fn(Application) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    LoaderFn(f)
}

#[async_trait]
impl<F, Fut> Loader for LoaderFn<F>
where
    F: Fn(Application) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn load(&self, app: Application) -> anyhow::Result<Value> {
        (self.0)(app).await
    }
}

/// Adapts an async closure into an [`OnLoad`]
pub struct OnLoadFn<F, T> {
    f: F,
    _data: PhantomData<fn() -> T>,
}

/// Wrap `f` as a transform
pub fn on_load_fn<T, F, Fut>(f: F) -> OnLoadFn<F, T>
where
    T: Send + 'static,
    F: Fn(Application, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
{
    OnLoadFn {
        f,
        _data: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> OnLoad<T> for OnLoadFn<F, T>
where
    T: Send + 'static,
    F: Fn(Application, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
{
    async fn on_load(&self, app: Application, raw: Value) -> anyhow::Result<Option<T>> {
        (self.f)(app, raw).await
    }
}

/// Transform used when a source configures none: deserialize the payload as-is.
/// A `null` payload keeps the current data.
pub struct DeserializeOnLoad;

#[async_trait]
impl<T> OnLoad<T> for DeserializeOnLoad
where
    T: DeserializeOwned + Send + 'static,
{
    async fn on_load(&self, _app: Application, raw: Value) -> anyhow::Result<Option<T>> {
        if raw.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(raw)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_deserialize_on_load() {
        let app = Application::builder("test").build();
        let parsed: Option<Vec<u32>> = DeserializeOnLoad.on_load(app.clone(), json!([1, 2])).await.unwrap();
        assert_eq!(parsed, Some(vec![1, 2]));

        let kept: Option<Vec<u32>> = DeserializeOnLoad.on_load(app.clone(), Value::Null).await.unwrap();
        assert!(kept.is_none());

        let bad: anyhow::Result<Option<Vec<u32>>> = DeserializeOnLoad.on_load(app, json!("nope")).await;
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_closure_adapters() {
        let app = Application::builder("test").build();
        let loader = loader_fn(|app: Application| async move {
            Ok::<_, anyhow::Error>(json!({ "app": app.name() }))
        });
        assert_eq!(loader.load(app.clone()).await.unwrap(), json!({ "app": "test" }));

        let transform = on_load_fn(|_app, raw: Value| async move {
            Ok::<_, anyhow::Error>(raw.get("app").and_then(Value::as_str).map(str::to_uppercase))
        });
        let out = transform.on_load(app, json!({ "app": "deck" })).await.unwrap();
        assert_eq!(out.as_deref(), Some("DECK"));
    }
}
