use std::path::{Path, PathBuf};

pub(crate) fn unique_tmp_dir(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("eager-cds-{}-{}", tag, nanos));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// 组装最小 class 文件（只含 Utf8/Class 常量，无属性）
pub(crate) struct ClassFileBuilder {
    this_class: String,
    super_class: Option<String>,
    interfaces: Vec<String>,
    access_flags: u16,
    major: u16,
    fields: Vec<(u16, String, String)>,
    methods: Vec<(u16, String, String)>,
}

impl ClassFileBuilder {
    pub(crate) fn new(internal_name: &str) -> Self {
        Self {
            this_class: internal_name.to_string(),
            super_class: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            access_flags: 0x0021,
            major: 52,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub(crate) fn major(mut self, major: u16) -> Self {
        self.major = major;
        self
    }

    pub(crate) fn interface(mut self, internal_name: &str) -> Self {
        self.interfaces.push(internal_name.to_string());
        self
    }

    pub(crate) fn field(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.fields.push((access, name.to_string(), descriptor.to_string()));
        self
    }

    pub(crate) fn method(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.methods.push((access, name.to_string(), descriptor.to_string()));
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut pool = ConstantPool::default();
        let this_idx = pool.class(&self.this_class);
        let super_idx = self.super_class.as_deref().map(|s| pool.class(s)).unwrap_or(0);
        let iface_idx: Vec<u16> = self.interfaces.iter().map(|i| pool.class(i)).collect();
        let field_idx: Vec<(u16, u16, u16)> = self
            .fields
            .iter()
            .map(|(a, n, d)| (*a, pool.utf8(n), pool.utf8(d)))
            .collect();
        let method_idx: Vec<(u16, u16, u16)> = self
            .methods
            .iter()
            .map(|(a, n, d)| (*a, pool.utf8(n), pool.utf8(d)))
            .collect();

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.major.to_be_bytes());
        out.extend_from_slice(&(pool.count + 1).to_be_bytes());
        out.extend_from_slice(&pool.bytes);
        out.extend_from_slice(&self.access_flags.to_be_bytes());
        out.extend_from_slice(&this_idx.to_be_bytes());
        out.extend_from_slice(&super_idx.to_be_bytes());
        out.extend_from_slice(&(iface_idx.len() as u16).to_be_bytes());
        for i in iface_idx {
            out.extend_from_slice(&i.to_be_bytes());
        }
        for members in [field_idx, method_idx] {
            out.extend_from_slice(&(members.len() as u16).to_be_bytes());
            for (access, name, desc) in members {
                out.extend_from_slice(&access.to_be_bytes());
                out.extend_from_slice(&name.to_be_bytes());
                out.extend_from_slice(&desc.to_be_bytes());
                out.extend_from_slice(&0u16.to_be_bytes()); // attributes_count
            }
        }
        out.extend_from_slice(&0u16.to_be_bytes()); // class attributes_count
        out
    }
}

#[derive(Default)]
struct ConstantPool {
    bytes: Vec<u8>,
    count: u16,
    utf8: Vec<(String, u16)>,
    classes: Vec<(String, u16)>,
}

impl ConstantPool {
    fn utf8(&mut self, s: &str) -> u16 {
        if let Some((_, idx)) = self.utf8.iter().find(|(v, _)| v == s) {
            return *idx;
        }
        self.bytes.push(1);
        self.bytes.extend_from_slice(&(s.len() as u16).to_be_bytes());
        self.bytes.extend_from_slice(s.as_bytes());
        self.count += 1;
        self.utf8.push((s.to_string(), self.count));
        self.count
    }

    fn class(&mut self, internal_name: &str) -> u16 {
        if let Some((_, idx)) = self.classes.iter().find(|(v, _)| v == internal_name) {
            return *idx;
        }
        let name_idx = self.utf8(internal_name);
        self.bytes.push(7);
        self.bytes.extend_from_slice(&name_idx.to_be_bytes());
        self.count += 1;
        self.classes.push((internal_name.to_string(), self.count));
        self.count
    }
}

/// 按 classpath 布局写入 `root/a/b/C.class`
pub(crate) fn write_class(root: &Path, internal_name: &str, bytes: &[u8]) -> PathBuf {
    let path = root.join(format!("{internal_name}.class"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, bytes).unwrap();
    path
}

/// 带一个字段、一个 native 方法的简单类
pub(crate) fn simple_class(internal_name: &str) -> Vec<u8> {
    ClassFileBuilder::new(internal_name)
        .field(0x0002, "value", "I")
        .method(0x0101, "run", "()V")
        .build()
}
