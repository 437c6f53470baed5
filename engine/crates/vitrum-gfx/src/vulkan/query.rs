use ash::vk;
use itertools::Itertools;

use crate::{
    backend::GfxQueries,
    error::{GfxResult, VkResultExt},
    handles::GfxQueryPoolHandle,
    query::GfxQueryResult,
    vulkan::VulkanBackend,
};

impl GfxQueries for VulkanBackend {
    fn create_query_pool(&mut self, ty: vk::QueryType, count: u32, name: &str) -> GfxResult<GfxQueryPoolHandle> {
        let pool_ci = vk::QueryPoolCreateInfo::default().query_type(ty).query_count(count);
        let pool = unsafe { self.device.create_query_pool(&pool_ci, None) }.vk_call("vkCreateQueryPool")?;
        self.device.set_object_debug_name(pool, format!("QueryPool::{}", name));

        Ok(self.res.query_pools.insert(pool))
    }

    fn destroy_query_pool(&mut self, pool: GfxQueryPoolHandle) {
        if let Some(pool) = self.res.query_pools.remove(pool) {
            unsafe { self.device.destroy_query_pool(pool, None) };
        }
    }

    fn query_results(&mut self, pool: GfxQueryPoolHandle, first: u32, count: u32) -> GfxResult<Vec<GfxQueryResult>> {
        // 每个 query 两个 u64：结果 + availability
        let mut data = vec![[0u64; 2]; count as usize];
        let result = unsafe {
            self.device.get_query_pool_results(
                self.res.query_pools[pool],
                first,
                &mut data,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WITH_AVAILABILITY,
            )
        };
        match result {
            // NOT_READY 时，数据仍然被写入，availability 为 0 的结果无效
            Ok(()) | Err(vk::Result::NOT_READY) => {}
            Err(e) => return Err(e).vk_call("vkGetQueryPoolResults"),
        }

        Ok(data
            .into_iter()
            .map(|[value, available]| {
                if available != 0 {
                    GfxQueryResult::Ready(value)
                } else {
                    GfxQueryResult::NotReady
                }
            })
            .collect_vec())
    }
}
