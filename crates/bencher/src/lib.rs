use http::Method;
use micro_app::router::{Dispatcher, RouteTable};
use micro_app::handler_fn;

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    method: &'static str,
    path: &'static str,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, method: &'static str, path: &'static str) -> Self {
        Self { name, group, method, path }
    }

    pub fn small(name: &'static str, method: &'static str, path: &'static str) -> Self {
        Self::new(name, TestGroup::Small, method, path)
    }

    pub fn large(name: &'static str, method: &'static str, path: &'static str) -> Self {
        Self::new(name, TestGroup::Large, method, path)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn method(&self) -> Method {
        Method::from_bytes(self.method.as_bytes()).unwrap_or(Method::GET)
    }

    pub fn path(&self) -> &'static str {
        self.path
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    /// A handful of routes
    Small,
    /// A few hundred resources
    Large,
}

impl TestGroup {
    /// Number of `/resourceN` groups registered for this group
    pub fn resources(self) -> usize {
        match self {
            TestGroup::Small => 2,
            TestGroup::Large => 200,
        }
    }
}

/// Builds the dispatcher of `group`: every resource gets a collection route, a member route and
/// a nested comments route, plus a root route and a catch-all for static files.
pub fn dispatcher(group: TestGroup) -> Dispatcher {
    let mut table = RouteTable::new();
    let noop = || handler_fn(|_req| ());

    let mut add = |methods: &[Method], pattern: &str| {
        if let Err(e) = table.add_route(methods.iter().cloned(), pattern, noop()) {
            panic!("benchmark route {pattern} should be valid: {e}");
        }
    };

    add(&[Method::GET], "/");
    for index in 0..group.resources() {
        add(&[Method::GET, Method::POST], &format!("/resource{index}"));
        add(&[Method::GET, Method::PUT, Method::DELETE], &format!("/resource{index}/{{id}}"));
        add(&[Method::GET], &format!("/resource{index}/{{id}}/comments/{{comment}}"));
    }
    add(&[Method::GET], "/static/{*file}");

    match table.into_dispatcher(None) {
        Ok(dispatcher) => dispatcher,
        Err(e) => panic!("benchmark routes should compile: {e}"),
    }
}
