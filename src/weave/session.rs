//! Weaving session: the explicit per-loader-scope context object
//!
//! One session owns every shared cache (metadata repository, pointcut
//! namespaces, definition registry); there is no ambient static state.
//! Sessions are created when a loader scope registers and dropped when it
//! unregisters; weaving itself is invoked synchronously per class.

use crate::common::error::Result;
use crate::definition::{DefinitionRegistry, SystemDefinition};
use crate::expr::{ExpressionInfo, NamespaceRegistry};
use crate::reflect::info::normalize_class_name;
use crate::reflect::{class_info_from_class_file, ClassInfoRepository};

use super::context::TransformContext;
use super::{standard_pipeline, WeaveSystem};

/// Result of weaving one class: the bytes to load, and whether any join
/// point was advised (false means `bytes` are the input, untouched).
#[derive(Debug)]
pub struct WeaveOutcome {
    pub bytes: Vec<u8>,
    pub advised: bool,
}

#[derive(Debug, Default)]
pub struct WeavingSession {
    repository: ClassInfoRepository,
    namespaces: NamespaceRegistry,
    definitions: DefinitionRegistry,
}

impl WeavingSession {
    pub fn new() -> Self {
        Self {
            repository: ClassInfoRepository::new(),
            namespaces: NamespaceRegistry::new(),
            definitions: DefinitionRegistry::new(),
        }
    }

    pub fn repository(&self) -> &ClassInfoRepository {
        &self.repository
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    pub fn register_definition(&self, definition: SystemDefinition) -> Result<()> {
        self.definitions.register(definition)?;
        Ok(())
    }

    /// Register a named pointcut, signature suffix included
    /// (`name(type arg, ...)`).
    pub fn register_pointcut(
        &self,
        namespace: &str,
        signature: &str,
        expression: &str,
    ) -> Result<()> {
        let (name, info) = ExpressionInfo::parse_with_signature(namespace, signature, expression)?;
        self.namespaces.register(namespace, &name, info);
        Ok(())
    }

    /// Drop the cached metadata of a redefined/unloaded class.
    pub fn invalidate_class(&self, class_name: &str) -> bool {
        self.repository.remove(&normalize_class_name(class_name))
    }

    /// Run the transformer pipeline over one class. Per-transformer failures
    /// are logged and the remaining stages still run; the class is always
    /// emitted in a loadable state (worst case: the input bytes unchanged).
    pub fn weave_class(&self, class_name: &str, bytes: &[u8]) -> Result<WeaveOutcome> {
        let dotted = normalize_class_name(class_name);
        if !self.definitions.in_include_scope(&dotted) {
            log::debug!("{dotted}: outside include scope, passing through");
            return Ok(WeaveOutcome { bytes: bytes.to_vec(), advised: false });
        }

        let mut context = TransformContext::new(&dotted, bytes);
        let extracted = context
            .class_file_mut()
            .and_then(|class_file| class_info_from_class_file(class_file));
        match extracted {
            Ok(info) => {
                // weaving a known class again is a redefinition
                self.repository.remove(&dotted);
                let info = self.repository.insert(info);
                context.set_class_info(info);
            }
            Err(e) => {
                log::error!("{dotted}: metadata extraction failed, passing through: {e}");
                return Ok(WeaveOutcome { bytes: bytes.to_vec(), advised: false });
            }
        }

        let system = WeaveSystem {
            definitions: &self.definitions,
            namespaces: &self.namespaces,
            repository: &self.repository,
        };
        for transformer in standard_pipeline() {
            context.state.reset_advised();
            if let Err(e) = transformer.transform(&mut context, &system) {
                log::error!(
                    "{dotted}: transformer '{}' failed, continuing with remaining stages: {e}",
                    transformer.name()
                );
            }
        }
        Ok(context.emit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::attribute::{CodeAttribute, ExceptionTableEntry};
    use crate::classfile::flag::access_flags::*;
    use crate::classfile::method::MethodInfo as RawMethod;
    use crate::classfile::opcodes::*;
    use crate::classfile::{class_file_to_bytes, parse_class_file, ClassFile};
    use crate::consts::{
        JOIN_POINT_INDEX_ATTRIBUTE, ORIGINAL_METHOD_PREFIX, WRAPPER_MARKER_ATTRIBUTE,
        WRAPPER_STATE_ADVISED, WRAPPER_STATE_PLACEHOLDER,
    };
    use crate::definition::{AdviceKind, IntroducedMethod};

    fn add_method(
        class_file: &mut ClassFile,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: CodeAttribute,
    ) {
        let name_index = class_file.constant_pool.add_utf8(name);
        let descriptor_index = class_file.constant_pool.add_utf8(descriptor);
        let mut method = RawMethod::new(access_flags, name_index, descriptor_index);
        method.set_code(&mut class_file.constant_pool, &code);
        class_file.methods.push(method);
    }

    /// pkg/Target with a field, a couple of methods, a call site, a field
    /// read and a catch block.
    fn target_class_bytes() -> Vec<u8> {
        let mut class_file = ClassFile::new();
        class_file.access_flags = ACC_PUBLIC | ACC_SUPER;
        class_file.this_class = class_file.constant_pool.add_class("pkg/Target");
        class_file.super_class = class_file.constant_pool.add_class("java/lang/Object");

        let count_name = class_file.constant_pool.add_utf8("count");
        let count_descriptor = class_file.constant_pool.add_utf8("I");
        class_file.fields.push(crate::classfile::FieldInfo::new(
            ACC_PUBLIC,
            count_name,
            count_descriptor,
        ));

        let object_init =
            class_file.constant_pool.add_method_ref("java/lang/Object", "<init>", "()V");
        add_method(
            &mut class_file,
            ACC_PUBLIC,
            "<init>",
            "()V",
            CodeAttribute::new(1, 1, {
                let mut code = vec![ALOAD_0, INVOKESPECIAL];
                code.extend_from_slice(&object_init.to_be_bytes());
                code.push(RETURN);
                code
            }),
        );

        add_method(
            &mut class_file,
            ACC_PUBLIC,
            "foo",
            "(Ljava/lang/String;)I",
            CodeAttribute::new(1, 2, vec![ICONST_0, IRETURN]),
        );

        let foo_ref = class_file.constant_pool.add_method_ref(
            "pkg/Target",
            "foo",
            "(Ljava/lang/String;)I",
        );
        add_method(
            &mut class_file,
            ACC_PUBLIC,
            "caller",
            "()V",
            CodeAttribute::new(2, 1, {
                let mut code = vec![ALOAD_0, ACONST_NULL, INVOKEVIRTUAL];
                code.extend_from_slice(&foo_ref.to_be_bytes());
                code.push(POP);
                code.push(RETURN);
                code
            }),
        );

        let count_ref = class_file.constant_pool.add_field_ref("pkg/Target", "count", "I");
        add_method(
            &mut class_file,
            ACC_PUBLIC,
            "reader",
            "()I",
            CodeAttribute::new(1, 1, {
                let mut code = vec![ALOAD_0, GETFIELD];
                code.extend_from_slice(&count_ref.to_be_bytes());
                code.push(IRETURN);
                code
            }),
        );

        let exception = class_file.constant_pool.add_class("java/lang/IllegalStateException");
        let astore_1 = 0x4c;
        let mut catcher_code = CodeAttribute::new(1, 2, vec![NOP, NOP, RETURN, astore_1, RETURN]);
        catcher_code.exception_table.push(ExceptionTableEntry::new(0, 2, 3, exception));
        add_method(&mut class_file, ACC_PUBLIC, "catcher", "()V", catcher_code);

        class_file_to_bytes(&class_file)
    }

    fn session_with_expression(expression: &str) -> WeavingSession {
        let session = WeavingSession::new();
        let mut definition = SystemDefinition::new("test-scope");
        definition
            .add_advice_binding(
                "advice",
                "testAspect",
                AdviceKind::Around,
                ExpressionInfo::parse("testAspect", expression).unwrap(),
                session.namespaces(),
            )
            .unwrap();
        session.register_definition(definition).unwrap();
        session
    }

    fn wrapper_state_of(class_file: &ClassFile, name: &str, descriptor: &str) -> Option<u8> {
        let index = class_file.find_method(name, descriptor)?;
        class_file.methods[index]
            .find_attribute(&class_file.constant_pool, WRAPPER_MARKER_ATTRIBUTE)
            .and_then(|a| a.info.first().copied())
    }

    #[test]
    fn test_execution_weaving_and_idempotence() {
        let bytes = target_class_bytes();
        let session = session_with_expression("execution(int pkg.Target.foo(..))");

        let outcome = session.weave_class("pkg.Target", &bytes).unwrap();
        assert!(outcome.advised);
        let woven = parse_class_file(&outcome.bytes).unwrap();

        let companion = format!("{ORIGINAL_METHOD_PREFIX}foo");
        let companion_index = woven
            .find_method(&companion, "(Ljava/lang/String;)I")
            .expect("companion holds the original body");
        let companion_code = woven.methods[companion_index]
            .code(&woven.constant_pool)
            .unwrap()
            .unwrap();
        assert_eq!(companion_code.code, vec![ICONST_0, IRETURN]);
        assert_eq!(
            wrapper_state_of(&woven, "foo", "(Ljava/lang/String;)I"),
            Some(WRAPPER_STATE_ADVISED)
        );
        assert!(woven.find_attribute(JOIN_POINT_INDEX_ATTRIBUTE).is_some());

        // re-weaving with the same definition set is a no-op: no duplicate
        // wrappers, no join-point index growth
        let again = session.weave_class("pkg.Target", &outcome.bytes).unwrap();
        assert!(!again.advised);
        assert_eq!(again.bytes, outcome.bytes);
        let rewoven = parse_class_file(&again.bytes).unwrap();
        assert_eq!(rewoven.methods.len(), woven.methods.len());
    }

    #[test]
    fn test_unweaving_restores_placeholder() {
        let bytes = target_class_bytes();
        let session = session_with_expression("execution(int pkg.Target.foo(..))");
        let woven = session.weave_class("pkg.Target", &bytes).unwrap();

        // same scope, pointcut removed
        let empty_session = WeavingSession::new();
        let mut definition = SystemDefinition::new("test-scope");
        definition.add_include_prefix("pkg");
        empty_session.register_definition(definition).unwrap();

        let unwoven_outcome = empty_session.weave_class("pkg.Target", &woven.bytes).unwrap();
        assert!(unwoven_outcome.advised);
        let unwoven = parse_class_file(&unwoven_outcome.bytes).unwrap();
        assert_eq!(
            wrapper_state_of(&unwoven, "foo", "(Ljava/lang/String;)I"),
            Some(WRAPPER_STATE_PLACEHOLDER)
        );
        // the placeholder passes straight through to the companion
        let foo_index = unwoven.find_method("foo", "(Ljava/lang/String;)I").unwrap();
        let foo_code = unwoven.methods[foo_index].code(&unwoven.constant_pool).unwrap().unwrap();
        assert_eq!(*foo_code.code.last().unwrap(), IRETURN);
        assert!(foo_code.code.contains(&INVOKEVIRTUAL));

        // unweaving again changes nothing further
        let settled = empty_session.weave_class("pkg.Target", &unwoven_outcome.bytes).unwrap();
        assert!(!settled.advised);
        assert_eq!(settled.bytes, unwoven_outcome.bytes);
    }

    #[test]
    fn test_call_site_weaving() {
        let bytes = target_class_bytes();
        let session = session_with_expression("call(int pkg.Target.foo(String))");
        let outcome = session.weave_class("pkg.Target", &bytes).unwrap();
        assert!(outcome.advised);

        let woven = parse_class_file(&outcome.bytes).unwrap();
        let caller_index = woven.find_method("caller", "()V").unwrap();
        let caller_code = woven.methods[caller_index].code(&woven.constant_pool).unwrap().unwrap();
        // invokevirtual at pc 2 became invokestatic to the call wrapper
        assert_eq!(caller_code.code[2], INVOKESTATIC);
        let wrapper_ref = u16::from_be_bytes([caller_code.code[3], caller_code.code[4]]);
        let (owner, name, _) = woven.constant_pool.member_ref(wrapper_ref).unwrap();
        assert_eq!(owner, "pkg/Target");
        assert!(name.starts_with("jweave$call$"));
        // the wrapper exists exactly once
        let wrappers = woven
            .methods
            .iter()
            .filter(|m| {
                woven
                    .constant_pool
                    .utf8(m.name_index)
                    .map(|n| n.starts_with("jweave$call$"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(wrappers, 1);

        // idempotent: rewritten sites are not call candidates any more
        let again = session.weave_class("pkg.Target", &outcome.bytes).unwrap();
        assert!(!again.advised);
    }

    #[test]
    fn test_field_get_weaving() {
        let bytes = target_class_bytes();
        let session = session_with_expression("get(public int pkg.Target.count)");
        let outcome = session.weave_class("pkg.Target", &bytes).unwrap();
        assert!(outcome.advised);

        let woven = parse_class_file(&outcome.bytes).unwrap();
        let reader_index = woven.find_method("reader", "()I").unwrap();
        let reader_code = woven.methods[reader_index].code(&woven.constant_pool).unwrap().unwrap();
        assert_eq!(reader_code.code[1], INVOKESTATIC);
        let wrapper_ref = u16::from_be_bytes([reader_code.code[2], reader_code.code[3]]);
        let (_, name, descriptor) = woven.constant_pool.member_ref(wrapper_ref).unwrap();
        assert!(name.starts_with("jweave$get$"));
        assert_eq!(descriptor, "(Lpkg/Target;)I");
    }

    #[test]
    fn test_handler_weaving() {
        let bytes = target_class_bytes();
        let session = session_with_expression("handler(java.lang.IllegalStateException)");
        let outcome = session.weave_class("pkg.Target", &bytes).unwrap();
        assert!(outcome.advised);

        let woven = parse_class_file(&outcome.bytes).unwrap();
        let catcher_index = woven.find_method("catcher", "()V").unwrap();
        let catcher_code = woven.methods[catcher_index].code(&woven.constant_pool).unwrap().unwrap();
        let entry = &catcher_code.exception_table[0];
        // the handler was redirected to the appended stub, which jumps back
        assert!(entry.handler_pc as usize > 3);
        assert_eq!(catcher_code.code[entry.handler_pc as usize], DUP);
        assert!(catcher_code.code.contains(&GOTO_W));

        // re-weaving recognizes the stub and leaves the entry alone
        let again = session.weave_class("pkg.Target", &outcome.bytes).unwrap();
        assert!(!again.advised);
    }

    #[test]
    fn test_constructor_execution_weaving() {
        let bytes = target_class_bytes();
        let session = session_with_expression("execution(pkg.Target.new(..))");
        let outcome = session.weave_class("pkg.Target", &bytes).unwrap();
        assert!(outcome.advised);

        let woven = parse_class_file(&outcome.bytes).unwrap();
        let body_method = woven
            .methods
            .iter()
            .find(|m| {
                woven
                    .constant_pool
                    .utf8(m.name_index)
                    .map(|n| n.starts_with("jweave$init$body$"))
                    .unwrap_or(false)
            })
            .expect("constructor body companion exists");
        let body_code = body_method.code(&woven.constant_pool).unwrap().unwrap();
        // the tail after the super call is just `return`
        assert_eq!(body_code.code, vec![RETURN]);
        assert_eq!(wrapper_state_of(&woven, "<init>", "()V"), Some(WRAPPER_STATE_ADVISED));

        let again = session.weave_class("pkg.Target", &outcome.bytes).unwrap();
        assert!(!again.advised);
    }

    #[test]
    fn test_include_scope_passthrough() {
        let bytes = target_class_bytes();
        let session = WeavingSession::new();
        let mut definition = SystemDefinition::new("scoped");
        definition.add_include_prefix("other");
        definition
            .add_advice_binding(
                "advice",
                "testAspect",
                AdviceKind::Before,
                ExpressionInfo::parse("testAspect", "execution(int pkg.Target.foo(..))").unwrap(),
                session.namespaces(),
            )
            .unwrap();
        session.register_definition(definition).unwrap();

        let outcome = session.weave_class("pkg.Target", &bytes).unwrap();
        assert!(!outcome.advised);
        assert_eq!(outcome.bytes, bytes);
    }

    #[test]
    fn test_interface_introduction() {
        let bytes = target_class_bytes();
        let session = WeavingSession::new();
        let mut definition = SystemDefinition::new("test-scope");
        definition
            .add_introduction_binding(
                "tagMixin",
                "pkg.Tagged",
                vec![IntroducedMethod {
                    name: "tag".to_string(),
                    descriptor: "()Ljava/lang/String;".to_string(),
                }],
                ExpressionInfo::parse("testAspect", "within(pkg..*)").unwrap(),
                session.namespaces(),
            )
            .unwrap();
        session.register_definition(definition).unwrap();

        let outcome = session.weave_class("pkg.Target", &bytes).unwrap();
        assert!(outcome.advised);
        let woven = parse_class_file(&outcome.bytes).unwrap();
        assert!(woven.has_interface("pkg/Tagged"));
        let tag_index = woven.find_method("tag", "()Ljava/lang/String;").unwrap();
        let tag_code = woven.methods[tag_index].code(&woven.constant_pool).unwrap().unwrap();
        assert!(tag_code.code.contains(&INVOKEINTERFACE));
        assert_eq!(*tag_code.code.last().unwrap(), ARETURN);

        let again = session.weave_class("pkg.Target", &outcome.bytes).unwrap();
        assert!(!again.advised);
    }

    #[test]
    fn test_corrupt_input_passes_through() {
        let session = session_with_expression("execution(int pkg.Target.foo(..))");
        let garbage = vec![0xde, 0xad, 0xbe, 0xef, 0, 1, 2, 3];
        let outcome = session.weave_class("pkg.Target", &garbage).unwrap();
        assert!(!outcome.advised);
        assert_eq!(outcome.bytes, garbage);
    }
}
